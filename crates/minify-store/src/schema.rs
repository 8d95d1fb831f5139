use minify_catalog::{Catalog, ColumnSaveSpec, METADATA_TABLE as META_TABLE};
use rusqlite::{params, Connection, OptionalExtension};

use crate::store::{Result, StorageError};

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
}

/// Create the main table, its secondary indices and the metadata table.
pub(crate) fn create(conn: &mut Connection, catalog: &Catalog) -> Result<()> {
    let table = catalog.table_name();
    if table_exists(conn, table)? || table_exists(conn, META_TABLE)? {
        return Err(StorageError::AlreadyInitialized(table.to_string()));
    }

    let columns: Vec<String> = catalog
        .save_columns()
        .iter()
        .map(|spec| format!("  {} {}", quote_ident(&spec.name), spec.storage.sql_declaration()))
        .collect();

    let tx = conn.transaction()?;
    tx.execute_batch(&format!(
        "CREATE TABLE {} (\n{}\n);",
        quote_ident(table),
        columns.join(",\n")
    ))?;

    tx.execute_batch(
        r#"
        CREATE TABLE meta (
          source_file_id TEXT NOT NULL UNIQUE,
          rows_retained INTEGER NOT NULL,
          rows_original INTEGER NOT NULL,
          elapsed_seconds REAL NOT NULL,
          ingested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
          CHECK (rows_retained >= 0 AND rows_retained <= rows_original)
        );
        "#,
    )?;

    for spec in catalog.save_columns().iter().filter(|spec| spec.indexed) {
        log::info!("Creating index on {}", spec.name);
        tx.execute_batch(&format!(
            "CREATE INDEX {} ON {} ({});",
            quote_ident(&format!("{}_index", spec.name)),
            quote_ident(table),
            quote_ident(&spec.name)
        ))?;
    }

    tx.commit()?;
    Ok(())
}

/// Check that an existing database has the layout `catalog` describes.
pub(crate) fn verify(conn: &Connection, catalog: &Catalog) -> Result<()> {
    let table = catalog.table_name();
    let mismatch = |detail: String| StorageError::SchemaMismatch {
        table: table.to_string(),
        detail,
    };

    if !table_exists(conn, META_TABLE)? {
        return Err(mismatch("metadata table `meta` is missing".to_string()));
    }

    let existing = table_columns(conn, table)?;
    if existing.is_empty() {
        return Err(mismatch("table is missing".to_string()));
    }

    let expected = catalog.save_columns();
    if existing.len() != expected.len() {
        return Err(mismatch(format!(
            "expected {} columns ({}), found {} ({})",
            expected.len(),
            join_names(expected.iter().map(|s| s.name.as_str())),
            existing.len(),
            join_names(existing.iter().map(|c| c.name.as_str())),
        )));
    }

    for (position, (found, spec)) in existing.iter().zip(expected).enumerate() {
        if !found.matches(spec) {
            return Err(mismatch(format!(
                "column {position} is {} {}, expected {} {}",
                found.name,
                found.declaration(),
                spec.name,
                spec.storage.sql_declaration()
            )));
        }
    }

    let meta_columns = table_columns(conn, META_TABLE)?;
    if !meta_columns.iter().any(|c| c.name == "source_file_id") {
        return Err(mismatch("metadata table has no source_file_id column".to_string()));
    }

    Ok(())
}

struct ExistingColumn {
    name: String,
    declared_type: String,
    not_null: bool,
}

impl ExistingColumn {
    fn declaration(&self) -> String {
        if self.not_null {
            format!("{} NOT NULL", self.declared_type)
        } else {
            self.declared_type.clone()
        }
    }

    fn matches(&self, spec: &ColumnSaveSpec) -> bool {
        self.name == spec.name
            && self.declaration().eq_ignore_ascii_case(&spec.storage.sql_declaration())
    }
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ExistingColumn>> {
    let mut stmt =
        conn.prepare("SELECT name, type, \"notnull\" FROM pragma_table_info(?1) ORDER BY cid")?;
    let rows = stmt.query_map(params![table], |r| {
        Ok(ExistingColumn {
            name: r.get(0)?,
            declared_type: r.get(1)?,
            not_null: r.get::<_, i64>(2)? != 0,
        })
    })?;

    let mut columns = Vec::new();
    for column in rows {
        columns.push(column?);
    }
    Ok(columns)
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}
