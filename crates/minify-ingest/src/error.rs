use std::io;
use std::path::PathBuf;

use minify_catalog::CatalogError;
use minify_store::{CoerceError, StorageError};
use thiserror::Error;

use crate::acquire::AcquireError;
use crate::reader::ReadError;
use crate::spatial::IndexError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(#[from] CatalogError),
    #[error("read error: {0}")]
    Read(#[from] ReadError),
    #[error("spatial indexing failed: {0}")]
    Index(#[from] IndexError),
    #[error("filtered row {row} cannot be stored: {source}")]
    Projection {
        row: usize,
        #[source]
        source: CoerceError,
    },
    #[error("store error: {0}")]
    Store(#[from] StorageError),
    #[error("failed to prepare scratch area: {0}")]
    Scratch(#[source] io::Error),
    #[error("acquisition failed: {0}")]
    Acquire(#[from] AcquireError),
    #[error("failed to read manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl IngestError {
    /// Errors that make every further file fail the same way: the batch stops.
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestError::Config(_) | IngestError::Manifest { .. } => true,
            IngestError::Store(err) => err.is_configuration(),
            IngestError::Read(_)
            | IngestError::Index(_)
            | IngestError::Projection { .. }
            | IngestError::Scratch(_)
            | IngestError::Acquire(_) => false,
        }
    }
}
