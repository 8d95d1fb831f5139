//! SQLite-backed store for minify-gaia.
//!
//! Two tables:
//! - the main table, whose columns are exactly the catalog's save list
//!   (spatial columns first), with secondary indices on indexed columns;
//! - `meta`, one provenance row per ingested source file, unique on
//!   `source_file_id`.
//!
//! [`Store::load_file`] appends a file's rows and its metadata record in one
//! transaction, so a file is either fully loaded and recorded or not at all.

mod schema;
pub mod store;
mod value;

pub use store::{FileLoad, IngestionRecord, LoadOutcome, Store, StorageError};
pub use value::{CoerceError, StoredValue};
