//! Ingestion pipeline for minify-gaia.
//!
//! [`FileProcessor`] turns one Gaia source file into rows of the analytical
//! store: read the pulled columns, apply the catalog's cuts, attach mesh
//! cells and unit vectors through a [`SpatialIndexer`], coerce to the save
//! list and load everything together with the file's metadata record.
//! [`BatchOrchestrator`] drives it over a [`Manifest`], acquiring missing
//! files through an [`Acquirer`] and isolating per-file failures.

#![forbid(unsafe_code)]

mod acquire;
mod batch;
mod error;
mod filter;
mod manifest;
mod mask;
mod processor;
mod project;
mod reader;
mod spatial;
mod table;

pub use acquire::{
    validate_identifier, AcquireError, Acquirer, DownloadPolicy, HttpAcquirer, DEFAULT_BASE_URL,
};
pub use batch::{
    BatchCounts, BatchEntry, BatchOptions, BatchOrchestrator, BatchStatus, BatchSummary,
    FailurePolicy,
};
pub use error::IngestError;
pub use filter::build_mask;
pub use manifest::Manifest;
pub use mask::RowMask;
pub use processor::{FileOutcome, FileProcessor};
pub use project::project_rows;
pub use reader::{read_csv, read_source, ReadError};
pub use spatial::{
    check_fields, ExternalIndexer, IndexError, SkyPosition, SpatialFields, SpatialIndexer,
    DEFAULT_INDEXER_PROGRAM,
};
pub use table::{SourceTable, Value};
