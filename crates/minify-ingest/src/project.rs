use minify_catalog::{Catalog, ColumnSaveSpec};
use minify_store::{CoerceError, StoredValue};

use crate::error::IngestError;
use crate::reader::ReadError;
use crate::spatial::SpatialFields;
use crate::table::{SourceTable, Value};

enum Source<'t> {
    Cell,
    X,
    Y,
    Z,
    Column(&'t [Value]),
}

/// Build main-table rows, in save-list order, from the filtered rows and
/// their spatial fields.
pub fn project_rows(
    catalog: &Catalog,
    table: &SourceTable,
    fields: &[SpatialFields],
) -> Result<Vec<Vec<StoredValue>>, IngestError> {
    debug_assert_eq!(table.num_rows(), fields.len());
    let spatial = catalog.spatial();
    let sources = catalog
        .save_columns()
        .iter()
        .map(|spec| -> Result<_, ReadError> {
            let source = match spec.name.as_str() {
                name if name == spatial.cell => Source::Cell,
                name if name == spatial.x => Source::X,
                name if name == spatial.y => Source::Y,
                name if name == spatial.z => Source::Z,
                name => Source::Column(table.column(name).ok_or_else(|| {
                    ReadError::MissingColumns {
                        missing: vec![name.to_string()],
                    }
                })?),
            };
            Ok((spec, source))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::with_capacity(fields.len());
    for (row, row_fields) in fields.iter().enumerate() {
        let values = sources
            .iter()
            .map(|(spec, source)| coerce(spec, source, row, row_fields))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| IngestError::Projection { row, source })?;
        rows.push(values);
    }
    Ok(rows)
}

fn coerce(
    spec: &ColumnSaveSpec,
    source: &Source<'_>,
    row: usize,
    spatial: &SpatialFields,
) -> Result<StoredValue, CoerceError> {
    match source {
        Source::Cell => StoredValue::from_unsigned(spec, spatial.cell_id),
        Source::X => StoredValue::from_number(spec, spatial.x),
        Source::Y => StoredValue::from_number(spec, spatial.y),
        Source::Z => StoredValue::from_number(spec, spatial.z),
        Source::Column(values) => match &values[row] {
            Value::Missing => StoredValue::missing(spec),
            Value::Number(n) => StoredValue::from_number(spec, *n),
            Value::Text(text) => StoredValue::from_text(spec, text),
        },
    }
}
