//! Schema catalog for minify-gaia.
//!
//! Describes which source columns are pulled (with optional `[lower, upper)`
//! bounds), which columns are persisted and how, plus the global policies:
//! the proper-motion radius cut and whether rows with missing values are
//! dropped. A [`Catalog`] is validated once at construction and is read-only
//! afterwards.

#![forbid(unsafe_code)]

mod catalog;
mod document;
mod storage_type;

pub use catalog::{
    Catalog, CatalogBuilder, CatalogError, ColumnFilterSpec, ColumnSaveSpec, SpatialColumns,
    DEC_COLUMN, DEFAULT_DB_FILENAME, DEFAULT_MESH_DEPTH, DEFAULT_SOURCE_LIST, DEFAULT_TABLE_NAME,
    MAX_MESH_DEPTH, METADATA_TABLE, PMDEC_COLUMN, PMRA_COLUMN, RA_COLUMN,
};
pub use storage_type::{StorageKind, StorageType};
