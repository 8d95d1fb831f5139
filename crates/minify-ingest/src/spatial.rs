use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use minify_catalog::{SpatialColumns, DEC_COLUMN, RA_COLUMN};
use minify_fs::ScratchArea;
use thiserror::Error;

/// Program run by [`ExternalIndexer`] unless configured otherwise.
pub const DEFAULT_INDEXER_PROGRAM: &str = "SpatialIndex/bin/sptIndx";

/// Positions echoed back by the indexer must agree with ours to this many degrees.
const POSITION_TOLERANCE: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkyPosition {
    pub ra: f64,
    pub dec: f64,
}

/// Mesh cell and unit-sphere vector for one position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialFields {
    pub cell_id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SpatialFields {
    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to run spatial indexer {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("spatial indexer exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("spatial indexer produced no output at {0}")]
    MissingOutput(PathBuf),
    #[error("spatial indexer output has no {0:?} column")]
    MissingOutputColumn(String),
    #[error("spatial indexer output row {row}: cannot parse {column} value {value:?}")]
    Parse {
        row: usize,
        column: String,
        value: String,
    },
    #[error("spatial indexer returned {found} rows for {expected} positions")]
    RowCountMismatch { expected: usize, found: usize },
    #[error("spatial indexer returned non-finite coordinates for row {0}")]
    InvalidFields(usize),
    #[error("spatial indexer output row {0} does not match the input position")]
    Reordered(usize),
    #[error("scratch file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("scratch csv {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Maps sky positions to mesh cells and unit vectors, one result per input,
/// in input order. The same position always yields the same fields.
pub trait SpatialIndexer {
    fn index(
        &self,
        positions: &[SkyPosition],
        scratch: &ScratchArea,
    ) -> Result<Vec<SpatialFields>, IndexError>;
}

impl<T: SpatialIndexer + ?Sized> SpatialIndexer for &T {
    fn index(
        &self,
        positions: &[SkyPosition],
        scratch: &ScratchArea,
    ) -> Result<Vec<SpatialFields>, IndexError> {
        (**self).index(positions, scratch)
    }
}

impl<T: SpatialIndexer + ?Sized> SpatialIndexer for Box<T> {
    fn index(
        &self,
        positions: &[SkyPosition],
        scratch: &ScratchArea,
    ) -> Result<Vec<SpatialFields>, IndexError> {
        (**self).index(positions, scratch)
    }
}

/// Check an indexer's answer: one finite result per position.
pub fn check_fields(positions: &[SkyPosition], fields: &[SpatialFields]) -> Result<(), IndexError> {
    if fields.len() != positions.len() {
        return Err(IndexError::RowCountMismatch {
            expected: positions.len(),
            found: fields.len(),
        });
    }
    match fields.iter().position(|f| !f.is_valid()) {
        Some(row) => Err(IndexError::InvalidFields(row)),
        None => Ok(()),
    }
}

/// Runs the mesh indexing program as `<program> <depth> <input> <output>`.
///
/// The input is written to the scratch area's `sm` artifact as `ra,dec` CSV.
/// The program's output CSV (the `in` artifact) must carry the cell column
/// (`htm<depth>`) and `x`, `y`, `z`; extra columns are ignored, except that
/// echoed `ra`/`dec` columns are checked against the input order.
#[derive(Clone, Debug)]
pub struct ExternalIndexer {
    program: PathBuf,
    columns: SpatialColumns,
}

impl ExternalIndexer {
    pub fn new(program: impl Into<PathBuf>, columns: SpatialColumns) -> Self {
        Self {
            program: program.into(),
            columns,
        }
    }

    fn write_input(&self, path: &Path, positions: &[SkyPosition]) -> Result<(), IndexError> {
        let csv_err = |source| IndexError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
        writer.write_record([RA_COLUMN, DEC_COLUMN]).map_err(csv_err)?;
        for position in positions {
            writer
                .write_record([position.ra.to_string(), position.dec.to_string()])
                .map_err(csv_err)?;
        }
        writer.flush().map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn run(&self, input: &Path, output: &Path) -> Result<(), IndexError> {
        log::debug!(
            "running {} {} {} {}",
            self.program.display(),
            self.columns.depth,
            input.display(),
            output.display()
        );
        let result = Command::new(&self.program)
            .arg(self.columns.depth.to_string())
            .arg(input)
            .arg(output)
            .output()
            .map_err(|source| IndexError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !result.status.success() {
            return Err(IndexError::Failed {
                status: result.status,
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        if !output.is_file() {
            return Err(IndexError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }

    fn read_output(
        &self,
        path: &Path,
        positions: &[SkyPosition],
    ) -> Result<Vec<SpatialFields>, IndexError> {
        let csv_err = |source| IndexError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_err)?;
        let headers = reader.headers().map_err(csv_err)?.clone();
        let find = |name: &str| headers.iter().position(|h| h == name);
        let required = |name: &str| {
            find(name).ok_or_else(|| IndexError::MissingOutputColumn(name.to_string()))
        };
        let cell = required(&self.columns.cell)?;
        let x = required(&self.columns.x)?;
        let y = required(&self.columns.y)?;
        let z = required(&self.columns.z)?;
        let echoed = find(RA_COLUMN).zip(find(DEC_COLUMN));

        let mut fields = Vec::with_capacity(positions.len());
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(csv_err)?;
            let field = |index: usize, column: &str| {
                let raw = record.get(index).unwrap_or("");
                raw.parse::<f64>().map_err(|_| IndexError::Parse {
                    row,
                    column: column.to_string(),
                    value: raw.to_string(),
                })
            };
            let raw_cell = record.get(cell).unwrap_or("");
            let cell_id = raw_cell.parse::<u64>().map_err(|_| IndexError::Parse {
                row,
                column: self.columns.cell.clone(),
                value: raw_cell.to_string(),
            })?;

            if let (Some((ra, dec)), Some(expected)) = (echoed, positions.get(row)) {
                let ra = field(ra, RA_COLUMN)?;
                let dec = field(dec, DEC_COLUMN)?;
                if (ra - expected.ra).abs() > POSITION_TOLERANCE
                    || (dec - expected.dec).abs() > POSITION_TOLERANCE
                {
                    return Err(IndexError::Reordered(row));
                }
            }

            fields.push(SpatialFields {
                cell_id,
                x: field(x, &self.columns.x)?,
                y: field(y, &self.columns.y)?,
                z: field(z, &self.columns.z)?,
            });
        }
        Ok(fields)
    }
}

impl SpatialIndexer for ExternalIndexer {
    fn index(
        &self,
        positions: &[SkyPosition],
        scratch: &ScratchArea,
    ) -> Result<Vec<SpatialFields>, IndexError> {
        let input = scratch.filtered_path();
        let output = scratch.indexed_path();
        self.write_input(&input, positions)?;
        self.run(&input, &output)?;
        self.read_output(&output, positions)
    }
}
