use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use minify_catalog::{Catalog, DEC_COLUMN, RA_COLUMN};
use minify_fs::ScratchArea;
use minify_store::{FileLoad, IngestionRecord, LoadOutcome, Store};

use crate::error::IngestError;
use crate::filter::build_mask;
use crate::project::project_rows;
use crate::reader::read_source;
use crate::spatial::{check_fields, SkyPosition, SpatialIndexer};
use crate::table::SourceTable;

#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// Rows and metadata were committed by this call.
    Ingested(IngestionRecord),
    /// The file was already recorded; nothing was read or written.
    Skipped(IngestionRecord),
}

impl FileOutcome {
    pub fn record(&self) -> &IngestionRecord {
        match self {
            FileOutcome::Ingested(record) | FileOutcome::Skipped(record) => record,
        }
    }
}

/// Filters, indexes and loads one source file at a time into a [`Store`].
pub struct FileProcessor<I> {
    catalog: Arc<Catalog>,
    store: Store,
    indexer: I,
    scratch_root: PathBuf,
}

impl<I: SpatialIndexer> FileProcessor<I> {
    /// Scratch areas are created under the system temp directory.
    pub fn new(catalog: Arc<Catalog>, store: Store, indexer: I) -> Self {
        Self {
            catalog,
            store,
            indexer,
            scratch_root: std::env::temp_dir(),
        }
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn indexer(&self) -> &I {
        &self.indexer
    }

    /// Ingest the file at `path`, keyed by its file name.
    pub fn process_path(&self, path: &Path) -> Result<FileOutcome, IngestError> {
        let source_file_id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.process_file(&source_file_id, path)
    }

    /// Ingest one source file under `source_file_id`.
    ///
    /// Either all retained rows and the file's metadata record are committed
    /// together, or neither is. Intermediate artifacts are removed on every
    /// path out of this function.
    pub fn process_file(
        &self,
        source_file_id: &str,
        path: &Path,
    ) -> Result<FileOutcome, IngestError> {
        let started = Instant::now();

        if let Some(record) = self.store.ingestion_record(source_file_id)? {
            log::info!(
                "[{source_file_id}] Already added on {}. Skipping.",
                record.ingested_at
            );
            return Ok(FileOutcome::Skipped(record));
        }

        let table = read_source(path, self.catalog.pull_columns())?;
        let rows_original = table.num_rows();
        let mask = build_mask(&self.catalog, &table)?;
        let filtered = table.select(&mask);
        drop(table);

        let percent = if rows_original == 0 {
            100.0
        } else {
            100.0 * filtered.num_rows() as f64 / rows_original as f64
        };
        log::info!("[{source_file_id}] With cuts, compressed to {percent:4.2}% of original # rows");

        let fields = if filtered.is_empty() {
            Vec::new()
        } else {
            let scratch = ScratchArea::new_in(&self.scratch_root, source_file_id)
                .map_err(IngestError::Scratch)?;
            let positions = positions(&filtered)?;
            let fields = self.indexer.index(&positions, &scratch)?;
            check_fields(&positions, &fields)?;
            // Artifacts are no longer needed once the fields are in memory.
            scratch.close().map_err(IngestError::Scratch)?;
            fields
        };

        let rows = project_rows(&self.catalog, &filtered, &fields)?;
        let outcome = self.store.load_file(FileLoad {
            source_file_id,
            rows: &rows,
            rows_original: rows_original as u64,
            started,
        })?;

        match outcome {
            LoadOutcome::Loaded(record) => {
                log::info!(
                    "[{source_file_id}] Loaded {} rows in {:.2}s",
                    record.rows_retained,
                    record.elapsed_seconds
                );
                Ok(FileOutcome::Ingested(record))
            }
            LoadOutcome::AlreadyIngested(record) => {
                log::info!(
                    "[{source_file_id}] Loaded concurrently on {}. Skipping.",
                    record.ingested_at
                );
                Ok(FileOutcome::Skipped(record))
            }
        }
    }
}

fn positions(table: &SourceTable) -> Result<Vec<SkyPosition>, IngestError> {
    let missing = |name: &str| crate::reader::ReadError::MissingColumns {
        missing: vec![name.to_string()],
    };
    let ra = table.column(RA_COLUMN).ok_or_else(|| missing(RA_COLUMN))?;
    let dec = table.column(DEC_COLUMN).ok_or_else(|| missing(DEC_COLUMN))?;
    // The mask only keeps rows whose position is numeric.
    Ok(ra
        .iter()
        .zip(dec)
        .filter_map(|(ra, dec)| {
            Some(SkyPosition {
                ra: ra.as_number()?,
                dec: dec.as_number()?,
            })
        })
        .collect())
}
