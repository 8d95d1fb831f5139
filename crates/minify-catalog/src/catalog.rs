use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::storage_type::{StorageKind, StorageType};

pub const RA_COLUMN: &str = "ra";
pub const DEC_COLUMN: &str = "dec";
pub const PMRA_COLUMN: &str = "pmra";
pub const PMDEC_COLUMN: &str = "pmdec";

pub const DEFAULT_TABLE_NAME: &str = "gaiadr3_tiny";
pub const DEFAULT_DB_FILENAME: &str = "tiny_gaiadf3.db";
pub const DEFAULT_SOURCE_LIST: &str = "gaia_source.list";
pub const DEFAULT_MESH_DEPTH: u8 = 20;

/// Name of the per-file provenance table; not available as a main table name.
pub const METADATA_TABLE: &str = "meta";

/// HTM ids at depth `d` need `2 * d + 4` bits; keep them inside a signed
/// 64-bit SQLite integer.
pub const MAX_MESH_DEPTH: u8 = 29;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid column or table identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("table name {0:?} is reserved")]
    ReservedTableName(String),
    #[error("column {column:?} appears more than once in the {list} list")]
    DuplicateColumn { column: String, list: &'static str },
    #[error("bounds for {column:?} select nothing: lower {lower} is not below upper {upper}")]
    EmptyBounds { column: String, lower: f64, upper: f64 },
    #[error("bound for {column:?} is not a finite number")]
    NonFiniteBound { column: String },
    #[error("max proper motion must be a positive finite number, got {0}")]
    InvalidProperMotion(f64),
    #[error("missing required columns to limit proper motion: {}", missing.join(", "))]
    MissingProperMotionColumns { missing: Vec<String> },
    #[error("save column {0:?} is neither pulled from the source nor produced by the spatial indexer")]
    UnsourcedSaveColumn(String),
    #[error("invalid storage type: {0:?}")]
    InvalidStorageType(String),
    #[error("mesh depth {0} is outside 0..={MAX_MESH_DEPTH}")]
    InvalidMeshDepth(u8),
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog document: {0}")]
    Json(#[from] serde_json::Error),
}

/// A source column to pull, optionally constrained to `[lower, upper)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnFilterSpec {
    pub name: String,
    /// Inclusive.
    pub lower: Option<f64>,
    /// Exclusive.
    pub upper: Option<f64>,
}

impl ColumnFilterSpec {
    /// A pulled column with no bounds.
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lower: None,
            upper: None,
        }
    }

    pub fn bounded(name: impl Into<String>, lower: Option<f64>, upper: Option<f64>) -> Self {
        Self {
            name: name.into(),
            lower,
            upper,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.lower.is_some() || self.upper.is_some()
    }

    /// `lower <= value < upper`, treating an absent bound as unconstrained.
    ///
    /// NaN never satisfies a bounded spec.
    pub fn admits(&self, value: f64) -> bool {
        if value.is_nan() && self.is_bounded() {
            return false;
        }
        self.lower.map_or(true, |lower| value >= lower)
            && self.upper.map_or(true, |upper| value < upper)
    }
}

/// A column persisted in the main table.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSaveSpec {
    pub name: String,
    pub storage: StorageType,
    pub indexed: bool,
}

impl ColumnSaveSpec {
    pub fn new(name: impl Into<String>, storage: StorageType, indexed: bool) -> Self {
        Self {
            name: name.into(),
            storage,
            indexed,
        }
    }
}

/// Names of the columns the spatial indexer appends, and the mesh depth it runs at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpatialColumns {
    pub depth: u8,
    pub cell: String,
    pub x: String,
    pub y: String,
    pub z: String,
}

impl SpatialColumns {
    pub fn at_depth(depth: u8) -> Self {
        Self {
            depth,
            cell: format!("htm{depth}"),
            x: "x".to_string(),
            y: "y".to_string(),
            z: "z".to_string(),
        }
    }

    pub fn names(&self) -> [&str; 4] {
        [&self.cell, &self.x, &self.y, &self.z]
    }

    fn save_specs(&self) -> Vec<ColumnSaveSpec> {
        let cell = StorageType::new(StorageKind::UBigInt).not_null();
        let coord = StorageType::new(StorageKind::Double).not_null();
        vec![
            ColumnSaveSpec::new(self.cell.clone(), cell, true),
            ColumnSaveSpec::new(self.x.clone(), coord, false),
            ColumnSaveSpec::new(self.y.clone(), coord, false),
            ColumnSaveSpec::new(self.z.clone(), coord, false),
        ]
    }
}

/// Validated, immutable ingestion configuration.
///
/// Built once (see [`CatalogBuilder`]) and shared by reference with every
/// component; nothing mutates it after [`CatalogBuilder::build`].
#[derive(Clone, Debug, PartialEq)]
pub struct Catalog {
    table_name: String,
    filters: Vec<ColumnFilterSpec>,
    pull_columns: Vec<String>,
    save_columns: Vec<ColumnSaveSpec>,
    max_proper_motion: Option<f64>,
    drop_missing_rows: bool,
    spatial: SpatialColumns,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// The astrometry preset: the column cuts used for finding-chart work.
    pub fn astrometry() -> Self {
        Self::builder()
            .bounded("phot_rp_mean_mag", Some(12.0), Some(19.0))
            .column(PMRA_COLUMN)
            .column(PMDEC_COLUMN)
            .bounded("parallax", None, Some(250.0))
            .bounded("ruwe", None, Some(1.4))
            .max_proper_motion(Some(250.0))
            .drop_missing_rows(true)
            .save("phot_rp_mean_mag", StorageType::decimal(4, 2), false)
            .save(PMRA_COLUMN, StorageType::decimal(6, 2), false)
            .save(PMDEC_COLUMN, StorageType::decimal(6, 2), false)
            .save("parallax", StorageType::decimal(6, 2), false)
            .build()
            .expect("astrometry preset is valid")
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Every configured filter spec, bounded or not, in declared order.
    pub fn filters(&self) -> &[ColumnFilterSpec] {
        &self.filters
    }

    pub fn bounded_filters(&self) -> impl Iterator<Item = &ColumnFilterSpec> {
        self.filters.iter().filter(|spec| spec.is_bounded())
    }

    /// Columns read from each source file: filter columns plus `ra`/`dec`.
    pub fn pull_columns(&self) -> &[String] {
        &self.pull_columns
    }

    /// Columns of the main table: spatial columns first, then the configured
    /// save specs in declared order.
    pub fn save_columns(&self) -> &[ColumnSaveSpec] {
        &self.save_columns
    }

    pub fn max_proper_motion(&self) -> Option<f64> {
        self.max_proper_motion
    }

    pub fn drop_missing_rows(&self) -> bool {
        self.drop_missing_rows
    }

    pub fn spatial(&self) -> &SpatialColumns {
        &self.spatial
    }

    pub fn from_json_str(text: &str) -> Result<Self, CatalogError> {
        let document: crate::document::CatalogDocument = serde_json::from_str(text)?;
        document.into_builder()?.build()
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

#[derive(Clone, Debug)]
pub struct CatalogBuilder {
    table_name: String,
    filters: Vec<ColumnFilterSpec>,
    saves: Vec<ColumnSaveSpec>,
    max_proper_motion: Option<f64>,
    drop_missing_rows: bool,
    mesh_depth: u8,
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            filters: Vec::new(),
            saves: Vec::new(),
            max_proper_motion: None,
            drop_missing_rows: true,
            mesh_depth: DEFAULT_MESH_DEPTH,
        }
    }
}

impl CatalogBuilder {
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    pub fn filter(mut self, spec: ColumnFilterSpec) -> Self {
        self.filters.push(spec);
        self
    }

    pub fn column(self, name: impl Into<String>) -> Self {
        self.filter(ColumnFilterSpec::column(name))
    }

    pub fn bounded(self, name: impl Into<String>, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.filter(ColumnFilterSpec::bounded(name, lower, upper))
    }

    pub fn save(mut self, name: impl Into<String>, storage: StorageType, indexed: bool) -> Self {
        self.saves.push(ColumnSaveSpec::new(name, storage, indexed));
        self
    }

    pub fn max_proper_motion(mut self, max: Option<f64>) -> Self {
        self.max_proper_motion = max;
        self
    }

    pub fn drop_missing_rows(mut self, drop: bool) -> Self {
        self.drop_missing_rows = drop;
        self
    }

    pub fn mesh_depth(mut self, depth: u8) -> Self {
        self.mesh_depth = depth;
        self
    }

    pub fn build(self) -> Result<Catalog, CatalogError> {
        validate_identifier(&self.table_name)?;
        if self.table_name.eq_ignore_ascii_case(METADATA_TABLE) {
            return Err(CatalogError::ReservedTableName(self.table_name));
        }
        if self.mesh_depth > MAX_MESH_DEPTH {
            return Err(CatalogError::InvalidMeshDepth(self.mesh_depth));
        }

        let mut seen = HashSet::new();
        for spec in &self.filters {
            validate_identifier(&spec.name)?;
            if !seen.insert(spec.name.as_str()) {
                return Err(CatalogError::DuplicateColumn {
                    column: spec.name.clone(),
                    list: "pull",
                });
            }
            for bound in [spec.lower, spec.upper].into_iter().flatten() {
                if !bound.is_finite() {
                    return Err(CatalogError::NonFiniteBound {
                        column: spec.name.clone(),
                    });
                }
            }
            if let (Some(lower), Some(upper)) = (spec.lower, spec.upper) {
                if lower >= upper {
                    return Err(CatalogError::EmptyBounds {
                        column: spec.name.clone(),
                        lower,
                        upper,
                    });
                }
            }
        }

        let mut pull_columns: Vec<String> = self.filters.iter().map(|s| s.name.clone()).collect();
        for required in [RA_COLUMN, DEC_COLUMN] {
            if !pull_columns.iter().any(|c| c == required) {
                pull_columns.push(required.to_string());
            }
        }

        if let Some(max) = self.max_proper_motion {
            if !max.is_finite() || max <= 0.0 {
                return Err(CatalogError::InvalidProperMotion(max));
            }
            let missing: Vec<String> = [PMRA_COLUMN, PMDEC_COLUMN]
                .into_iter()
                .filter(|name| !pull_columns.iter().any(|c| c == name))
                .map(str::to_string)
                .collect();
            if !missing.is_empty() {
                return Err(CatalogError::MissingProperMotionColumns { missing });
            }
        }

        let spatial = SpatialColumns::at_depth(self.mesh_depth);
        let mut save_columns = spatial.save_specs();
        for spec in self.saves {
            validate_identifier(&spec.name)?;
            if save_columns.iter().any(|existing| existing.name == spec.name) {
                return Err(CatalogError::DuplicateColumn {
                    column: spec.name,
                    list: "save",
                });
            }
            if !pull_columns.iter().any(|c| *c == spec.name) {
                return Err(CatalogError::UnsourcedSaveColumn(spec.name));
            }
            save_columns.push(spec);
        }

        Ok(Catalog {
            table_name: self.table_name,
            filters: self.filters,
            pull_columns,
            save_columns,
            max_proper_motion: self.max_proper_motion,
            drop_missing_rows: self.drop_missing_rows,
            spatial,
        })
    }
}

/// Identifiers end up in DDL and insert statements, so only plain SQL
/// identifiers are accepted.
fn validate_identifier(name: &str) -> Result<(), CatalogError> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_head && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(CatalogError::InvalidIdentifier(name.to_string()))
    }
}
