use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use csv::StringRecord;
use flate2::read::MultiGzDecoder;
use thiserror::Error;

use crate::table::{SourceTable, Value};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("csv parse error at data row {row}: {source}")]
    Csv {
        row: u64,
        #[source]
        source: csv::Error,
    },
    #[error("source is missing pulled columns: {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },
}

/// Read the pulled `columns` of the source file at `path`.
///
/// Gzip input is detected from its magic bytes, so `.csv.gz` and plain
/// `.csv` files are both accepted regardless of their name.
pub fn read_source(path: &Path, columns: &[String]) -> Result<SourceTable, ReadError> {
    let open_err = |source| ReadError::Open {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(open_err)?;
    let mut buffered = BufReader::new(file);
    let is_gzip = buffered.fill_buf().map_err(open_err)?.starts_with(&GZIP_MAGIC);
    if is_gzip {
        log::debug!("{}: reading gzip-compressed source", path.display());
        read_csv(MultiGzDecoder::new(buffered), columns)
    } else {
        read_csv(buffered, columns)
    }
}

/// Read the pulled `columns` from CSV text with a header row.
///
/// Lines starting with `#` are comments. Columns are materialized in
/// `columns` order; every other column of the source is skipped.
pub fn read_csv<R: Read>(reader: R, columns: &[String]) -> Result<SourceTable, ReadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|source| ReadError::Csv { row: 0, source })?
        .clone();
    let positions = locate_columns(&headers, columns)?;

    let mut table = SourceTable::new(columns.to_vec());
    let mut record = StringRecord::new();
    let mut row: u64 = 0;
    loop {
        match csv_reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                row += 1;
                table.push_row(
                    positions
                        .iter()
                        .map(|&index| Value::parse(record.get(index).unwrap_or(""))),
                );
            }
            Err(source) => return Err(ReadError::Csv { row: row + 1, source }),
        }
    }

    Ok(table)
}

fn locate_columns(headers: &StringRecord, columns: &[String]) -> Result<Vec<usize>, ReadError> {
    let mut positions = Vec::with_capacity(columns.len());
    let mut missing = Vec::new();
    for name in columns {
        match headers.iter().position(|header| header == name) {
            Some(index) => positions.push(index),
            None => missing.push(name.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(ReadError::MissingColumns { missing });
    }
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pretty_assertions::assert_eq;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    const SOURCE: &str = "\
# Gaia DR3 extract
# units: deg, mas/yr
source_id,ra,dec,pmra,phot_g_mean_mag
1, 10.5, -3.25, 1.0, 17.2
2,11.0,-3.0,null,
";

    #[test]
    fn reads_only_pulled_columns_in_pull_order() {
        let table = read_csv(SOURCE.as_bytes(), &names(&["pmra", "ra", "dec"])).unwrap();

        assert_eq!(table.names(), names(&["pmra", "ra", "dec"]).as_slice());
        assert_eq!(table.num_rows(), 2);
        assert_eq!(
            table.column("pmra").unwrap(),
            &[Value::Number(1.0), Value::Missing]
        );
        assert_eq!(
            table.column("ra").unwrap(),
            &[Value::Number(10.5), Value::Number(11.0)]
        );
        assert!(table.column("source_id").is_none());
    }

    #[test]
    fn missing_columns_are_reported_together() {
        let err = read_csv(SOURCE.as_bytes(), &names(&["ra", "ruwe", "parallax"])).unwrap_err();
        match err {
            ReadError::MissingColumns { missing } => {
                assert_eq!(missing, names(&["ruwe", "parallax"]))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ragged_rows_are_parse_errors() {
        let text = "ra,dec\n1,2\n3\n";
        let err = read_csv(text.as_bytes(), &names(&["ra", "dec"])).unwrap_err();
        assert!(matches!(err, ReadError::Csv { row: 2, .. }), "{err}");
    }

    #[test]
    fn gzip_sources_are_detected_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GaiaSource_1.csv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(SOURCE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let table = read_source(&path, &names(&["ra", "dec"])).unwrap();
        assert_eq!(table.num_rows(), 2);

        let plain = dir.path().join("plain.csv");
        std::fs::write(&plain, SOURCE).unwrap();
        assert_eq!(read_source(&plain, &names(&["ra", "dec"])).unwrap(), table);
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = read_source(Path::new("does/not/exist.csv"), &names(&["ra"])).unwrap_err();
        assert!(matches!(err, ReadError::Open { .. }), "{err}");
    }
}
