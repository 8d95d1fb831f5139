//! JSON form of a catalog.
//!
//! ```json
//! {
//!   "table_name": "gaiadr3_tiny",
//!   "columns_to_pull": [
//!     ["phot_rp_mean_mag", 12, 19],
//!     "pmra",
//!     {"name": "parallax", "upper": 250}
//!   ],
//!   "columns_to_save": [
//!     ["phot_rp_mean_mag", "decimal(4,2)", false],
//!     {"name": "pmra", "type": "decimal(6,2)"}
//!   ],
//!   "max_pm": 250,
//!   "drop_missing_rows": true
//! }
//! ```

use serde::Deserialize;

use crate::catalog::{CatalogBuilder, ColumnFilterSpec, DEFAULT_MESH_DEPTH, DEFAULT_TABLE_NAME};
use crate::{CatalogError, StorageType};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CatalogDocument {
    #[serde(default = "default_table_name")]
    table_name: String,
    columns_to_pull: Vec<FilterEntry>,
    #[serde(default)]
    columns_to_save: Vec<SaveEntry>,
    #[serde(default)]
    max_pm: Option<f64>,
    #[serde(default = "default_drop_missing_rows")]
    drop_missing_rows: bool,
    #[serde(default = "default_mesh_depth")]
    mesh_depth: u8,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FilterEntry {
    Name(String),
    Tuple(String, Option<f64>, Option<f64>),
    Object {
        name: String,
        #[serde(default)]
        lower: Option<f64>,
        #[serde(default)]
        upper: Option<f64>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SaveEntry {
    Tuple(String, String, bool),
    Object {
        name: String,
        #[serde(rename = "type")]
        storage: String,
        #[serde(default)]
        indexed: bool,
    },
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_drop_missing_rows() -> bool {
    true
}

fn default_mesh_depth() -> u8 {
    DEFAULT_MESH_DEPTH
}

impl CatalogDocument {
    pub(crate) fn into_builder(self) -> Result<CatalogBuilder, CatalogError> {
        let mut builder = CatalogBuilder::default()
            .table_name(self.table_name)
            .max_proper_motion(self.max_pm)
            .drop_missing_rows(self.drop_missing_rows)
            .mesh_depth(self.mesh_depth);

        for entry in self.columns_to_pull {
            builder = builder.filter(match entry {
                FilterEntry::Name(name) => ColumnFilterSpec::column(name),
                FilterEntry::Tuple(name, lower, upper)
                | FilterEntry::Object { name, lower, upper } => {
                    ColumnFilterSpec::bounded(name, lower, upper)
                }
            });
        }

        for entry in self.columns_to_save {
            let (name, storage, indexed) = match entry {
                SaveEntry::Tuple(name, storage, indexed) => (name, storage, indexed),
                SaveEntry::Object {
                    name,
                    storage,
                    indexed,
                } => (name, storage, indexed),
            };
            builder = builder.save(name, storage.parse::<StorageType>()?, indexed);
        }

        Ok(builder)
    }
}
