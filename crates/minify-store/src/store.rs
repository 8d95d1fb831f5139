use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use minify_catalog::{Catalog, ColumnSaveSpec};
use rusqlite::{
    params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use serde::Serialize;
use thiserror::Error;

use crate::schema::{self, quote_ident};
use crate::value::StoredValue;

/// Loads from other handles hold the write lock for the length of one file's append.
const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store already initialized (table {0:?} or meta exists); pass clobber to recreate")]
    AlreadyInitialized(String),
    #[error("store does not match catalog for table {table:?}: {detail}")]
    SchemaMismatch { table: String, detail: String },
    #[error("row {row} has {found} values, table has {expected} columns")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("{source_file_id}: {rows_retained} retained rows exceed {rows_original} original rows")]
    RetainedExceedsOriginal {
        source_file_id: String,
        rows_retained: u64,
        rows_original: u64,
    },
}

impl StorageError {
    /// The store cannot be used with this catalog at all.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StorageError::SchemaMismatch { .. } | StorageError::AlreadyInitialized(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Provenance of one ingested source file. Created once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionRecord {
    pub source_file_id: String,
    pub rows_retained: u64,
    pub rows_original: u64,
    pub elapsed_seconds: f64,
    pub ingested_at: DateTime<Utc>,
}

impl IngestionRecord {
    /// Fraction of source rows that survived filtering (1.0 for an empty file).
    pub fn retained_fraction(&self) -> f64 {
        if self.rows_original == 0 {
            1.0
        } else {
            self.rows_retained as f64 / self.rows_original as f64
        }
    }
}

/// One file's worth of projected rows, ready for [`Store::load_file`].
#[derive(Debug, Clone, Copy)]
pub struct FileLoad<'a> {
    pub source_file_id: &'a str,
    /// Values in main-table column order.
    pub rows: &'a [Vec<StoredValue>],
    pub rows_original: u64,
    /// When processing of this file began; elapsed time is measured up to the metadata insert.
    pub started: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded(IngestionRecord),
    /// Another writer recorded the file first; nothing was written.
    AlreadyIngested(IngestionRecord),
}

#[derive(Debug)]
struct TableLayout {
    table: String,
    columns: Vec<ColumnSaveSpec>,
    insert_sql: String,
    select_sql: String,
}

impl TableLayout {
    fn new(catalog: &Catalog) -> Self {
        let table = catalog.table_name().to_string();
        let columns = catalog.save_columns().to_vec();
        let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&table),
            names.join(", "),
            placeholders.join(", ")
        );
        let select_sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            names.join(", "),
            quote_ident(&table)
        );
        Self {
            table,
            columns,
            insert_sql,
            select_sql,
        }
    }
}

/// Handle to the analytical store: the main table plus the `meta` table.
///
/// Clones share one connection; every write goes through a single
/// `BEGIN IMMEDIATE` transaction, so loads from any number of handles are
/// serialized by SQLite's write lock.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    layout: Arc<TableLayout>,
}

impl Store {
    /// Create a new store file with the catalog's schema.
    ///
    /// With `clobber`, an existing file at `path` is removed first; without
    /// it, an existing schema is an [`StorageError::AlreadyInitialized`] error.
    pub fn create(path: impl AsRef<Path>, catalog: &Catalog, clobber: bool) -> Result<Self> {
        let path = path.as_ref();
        if clobber && path.exists() {
            std::fs::remove_file(path).map_err(|source| StorageError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            log::info!("removed file {}", path.display());
        }

        let mut conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::create(&mut conn, catalog)?;
        log::info!("DB created in file {}", path.display());
        Ok(Self::from_connection(conn, catalog))
    }

    /// Open an existing store and check it matches `catalog`.
    pub fn open(path: impl AsRef<Path>, catalog: &Catalog) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::verify(&conn, catalog)?;
        Ok(Self::from_connection(conn, catalog))
    }

    pub fn open_in_memory(catalog: &Catalog) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        schema::create(&mut conn, catalog)?;
        Ok(Self::from_connection(conn, catalog))
    }

    /// Open a URI (e.g. a shared-cache in-memory database), creating the
    /// schema if the database is empty.
    pub fn open_uri(uri: &str, catalog: &Catalog) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI;
        let mut conn = Connection::open_with_flags(uri, flags)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        if !schema::table_exists(&conn, catalog.table_name())? {
            schema::create(&mut conn, catalog)?;
        }
        schema::verify(&conn, catalog)?;
        Ok(Self::from_connection(conn, catalog))
    }

    fn from_connection(conn: Connection, catalog: &Catalog) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            layout: Arc::new(TableLayout::new(catalog)),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.layout.table
    }

    pub fn columns(&self) -> &[ColumnSaveSpec] {
        &self.layout.columns
    }

    /// Re-check the schema against a catalog (used before long batch runs).
    pub fn verify(&self, catalog: &Catalog) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        schema::verify(&conn, catalog)
    }

    pub fn ingestion_record(&self, source_file_id: &str) -> Result<Option<IngestionRecord>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        fetch_record(&conn, source_file_id)
    }

    pub fn is_ingested(&self, source_file_id: &str) -> Result<bool> {
        Ok(self.ingestion_record(source_file_id)?.is_some())
    }

    /// All metadata records, oldest first.
    pub fn ingestion_records(&self) -> Result<Vec<IngestionRecord>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            r#"
            SELECT source_file_id, rows_retained, rows_original, elapsed_seconds, ingested_at
            FROM meta
            ORDER BY ingested_at, rowid
            "#,
        )?;
        let rows = stmt.query_map([], record_from_row)?;

        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }

    pub fn row_count(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&self.layout.table)),
            [],
            |r| r.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Every row of the main table in insertion order.
    pub fn load_rows(&self) -> Result<Vec<Vec<StoredValue>>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(&self.layout.select_sql)?;
        let width = self.layout.columns.len();
        let rows = stmt.query_map([], |r| {
            (0..width)
                .map(|i| r.get::<_, StoredValue>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Append a file's rows and its metadata record as one transaction.
    ///
    /// The idempotency key is re-checked inside the transaction; if another
    /// writer recorded the file in the meantime nothing is written and
    /// [`LoadOutcome::AlreadyIngested`] is returned. On any error the
    /// transaction rolls back, leaving neither rows nor a metadata record.
    pub fn load_file(&self, load: FileLoad<'_>) -> Result<LoadOutcome> {
        let rows_retained = load.rows.len() as u64;
        if rows_retained > load.rows_original {
            return Err(StorageError::RetainedExceedsOriginal {
                source_file_id: load.source_file_id.to_string(),
                rows_retained,
                rows_original: load.rows_original,
            });
        }

        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = fetch_record(&tx, load.source_file_id)? {
            // Dropping `tx` rolls back the (empty) transaction.
            return Ok(LoadOutcome::AlreadyIngested(existing));
        }

        append_rows(&tx, &self.layout, load.rows)?;

        let record = IngestionRecord {
            source_file_id: load.source_file_id.to_string(),
            rows_retained,
            rows_original: load.rows_original,
            elapsed_seconds: load.started.elapsed().as_secs_f64(),
            ingested_at: Utc::now(),
        };
        insert_record(&tx, &record)?;

        tx.commit()?;
        Ok(LoadOutcome::Loaded(record))
    }
}

fn append_rows(tx: &Transaction<'_>, layout: &TableLayout, rows: &[Vec<StoredValue>]) -> Result<()> {
    let width = layout.columns.len();
    let mut stmt = tx.prepare_cached(&layout.insert_sql)?;
    for (index, row) in rows.iter().enumerate() {
        if row.len() != width {
            return Err(StorageError::RowWidth {
                row: index,
                expected: width,
                found: row.len(),
            });
        }
        stmt.execute(params_from_iter(row.iter()))?;
    }
    Ok(())
}

fn insert_record(tx: &Transaction<'_>, record: &IngestionRecord) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO meta (source_file_id, rows_retained, rows_original, elapsed_seconds, ingested_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            &record.source_file_id,
            to_sql_count(record.rows_retained)?,
            to_sql_count(record.rows_original)?,
            record.elapsed_seconds,
            record.ingested_at
        ],
    )?;
    Ok(())
}

fn to_sql_count(count: u64) -> Result<i64> {
    i64::try_from(count).map_err(|err| {
        StorageError::Sqlite(rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
    })
}

fn fetch_record(conn: &Connection, source_file_id: &str) -> Result<Option<IngestionRecord>> {
    let record = conn
        .query_row(
            r#"
            SELECT source_file_id, rows_retained, rows_original, elapsed_seconds, ingested_at
            FROM meta
            WHERE source_file_id = ?1
            "#,
            params![source_file_id],
            record_from_row,
        )
        .optional()?;
    Ok(record)
}

fn record_from_row(r: &Row<'_>) -> rusqlite::Result<IngestionRecord> {
    let rows_retained: i64 = r.get(1)?;
    let rows_original: i64 = r.get(2)?;
    Ok(IngestionRecord {
        source_file_id: r.get(0)?,
        rows_retained: rows_retained.max(0) as u64,
        rows_original: rows_original.max(0) as u64,
        elapsed_seconds: r.get(3)?,
        ingested_at: r.get(4)?,
    })
}
