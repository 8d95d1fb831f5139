use minify_catalog::{
    Catalog, CatalogError, ColumnSaveSpec, DEC_COLUMN, PMDEC_COLUMN, PMRA_COLUMN, RA_COLUMN,
};
use minify_store::StoredValue;

use crate::error::IngestError;
use crate::mask::RowMask;
use crate::reader::ReadError;
use crate::table::{SourceTable, Value};

/// Compute which rows of `table` survive the catalog's cuts.
///
/// Applied in order: missing-row dropping (when enabled), each bounded
/// column, the proper-motion radius, and finally the requirement that
/// `ra`/`dec` are finite numbers. A missing or non-numeric value never
/// satisfies a bound or the proper-motion cut. Columns that are also saved
/// are compared as they will be stored, so a rounded value cannot land
/// outside its bound.
pub fn build_mask(catalog: &Catalog, table: &SourceTable) -> Result<RowMask, IngestError> {
    let rows = table.num_rows();
    let mut mask = if catalog.drop_missing_rows() {
        table.complete_rows()
    } else {
        RowMask::all(rows)
    };

    for spec in catalog.bounded_filters() {
        let values = column(table, &spec.name)?;
        let saved = saved_as(catalog, &spec.name);
        mask.and_inplace(&RowMask::from_fn(rows, |row| {
            stored_number(saved, &values[row]).is_some_and(|v| spec.admits(v))
        }));
    }

    if let Some(max) = catalog.max_proper_motion() {
        let (pmra, pmdec) = match (table.column(PMRA_COLUMN), table.column(PMDEC_COLUMN)) {
            (Some(pmra), Some(pmdec)) => (pmra, pmdec),
            (pmra, pmdec) => {
                let missing = [(PMRA_COLUMN, pmra.is_none()), (PMDEC_COLUMN, pmdec.is_none())]
                    .into_iter()
                    .filter(|(_, absent)| *absent)
                    .map(|(name, _)| name.to_string())
                    .collect();
                return Err(CatalogError::MissingProperMotionColumns { missing }.into());
            }
        };
        let limit = max * max;
        let pmra_saved = saved_as(catalog, PMRA_COLUMN);
        let pmdec_saved = saved_as(catalog, PMDEC_COLUMN);
        mask.and_inplace(&RowMask::from_fn(rows, |row| {
            match (
                stored_number(pmra_saved, &pmra[row]),
                stored_number(pmdec_saved, &pmdec[row]),
            ) {
                (Some(a), Some(d)) => a * a + d * d < limit,
                _ => false,
            }
        }));
    }

    let ra = column(table, RA_COLUMN)?;
    let dec = column(table, DEC_COLUMN)?;
    mask.and_inplace(&RowMask::from_fn(rows, |row| {
        is_finite(&ra[row]) && is_finite(&dec[row])
    }));

    Ok(mask)
}

fn saved_as<'c>(catalog: &'c Catalog, name: &str) -> Option<&'c ColumnSaveSpec> {
    catalog.save_columns().iter().find(|spec| spec.name == name)
}

/// The number a cut should see: the stored form when the column is saved.
/// Values the storage type rejects are left as read; projection reports them.
fn stored_number(saved: Option<&ColumnSaveSpec>, value: &Value) -> Option<f64> {
    let number = value.as_number()?;
    let stored = saved
        .and_then(|spec| StoredValue::from_number(spec, number).ok())
        .and_then(|stored| stored.as_f64());
    Some(stored.unwrap_or(number))
}

fn is_finite(value: &Value) -> bool {
    value.as_number().is_some_and(f64::is_finite)
}

fn column<'t>(table: &'t SourceTable, name: &str) -> Result<&'t [Value], IngestError> {
    table.column(name).ok_or_else(|| {
        ReadError::MissingColumns {
            missing: vec![name.to_string()],
        }
        .into()
    })
}
