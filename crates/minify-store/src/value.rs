use minify_catalog::{ColumnSaveSpec, StorageKind};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;
use thiserror::Error;

/// A value ready to bind into the main table.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StoredValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum CoerceError {
    #[error("column {column:?} is NOT NULL but the value is missing")]
    MissingValue { column: String },
    #[error("value {value} does not fit {column:?} ({storage})")]
    OutOfRange {
        column: String,
        storage: String,
        value: String,
    },
    #[error("value {value:?} is not valid for {column:?} ({storage})")]
    TypeMismatch {
        column: String,
        storage: String,
        value: String,
    },
}

impl StoredValue {
    pub fn missing(spec: &ColumnSaveSpec) -> Result<Self, CoerceError> {
        if spec.storage.not_null {
            return Err(CoerceError::MissingValue {
                column: spec.name.clone(),
            });
        }
        Ok(StoredValue::Null)
    }

    /// Coerce a source number into `spec`'s storage type.
    ///
    /// Decimals are rounded half away from zero to their scale and must fit
    /// their precision; integers must be whole and in range.
    pub fn from_number(spec: &ColumnSaveSpec, value: f64) -> Result<Self, CoerceError> {
        if value.is_nan() {
            return Self::missing(spec);
        }

        match spec.storage.kind {
            StorageKind::Double => Ok(StoredValue::Real(value)),
            StorageKind::Decimal { precision, scale } => {
                let factor = 10f64.powi(i32::from(scale));
                let rounded = (value * factor).round() / factor;
                let limit = 10f64.powi(i32::from(precision) - i32::from(scale));
                if !rounded.is_finite() || rounded.abs() >= limit {
                    return Err(out_of_range(spec, value));
                }
                Ok(StoredValue::Real(rounded))
            }
            StorageKind::UBigInt | StorageKind::BigInt => {
                if value.fract() != 0.0 || !value.is_finite() {
                    return Err(mismatch(spec, value));
                }
                let min = if spec.storage.kind == StorageKind::UBigInt {
                    0.0
                } else {
                    i64::MIN as f64
                };
                // `i64::MAX as f64` rounds up to 2^63, which itself does not fit.
                if value < min || value >= i64::MAX as f64 {
                    return Err(out_of_range(spec, value));
                }
                Ok(StoredValue::Integer(value as i64))
            }
            StorageKind::Text => Ok(StoredValue::Text(value.to_string())),
        }
    }

    pub fn from_unsigned(spec: &ColumnSaveSpec, value: u64) -> Result<Self, CoerceError> {
        match spec.storage.kind {
            StorageKind::UBigInt | StorageKind::BigInt => i64::try_from(value)
                .map(StoredValue::Integer)
                .map_err(|_| out_of_range(spec, value)),
            StorageKind::Double => Ok(StoredValue::Real(value as f64)),
            StorageKind::Decimal { .. } => Self::from_number(spec, value as f64),
            StorageKind::Text => Ok(StoredValue::Text(value.to_string())),
        }
    }

    pub fn from_text(spec: &ColumnSaveSpec, value: &str) -> Result<Self, CoerceError> {
        match spec.storage.kind {
            StorageKind::Text => Ok(StoredValue::Text(value.to_string())),
            _ => {
                let number: f64 = value.trim().parse().map_err(|_| mismatch(spec, value))?;
                Self::from_number(spec, number)
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StoredValue::Integer(v) => Some(*v as f64),
            StoredValue::Real(v) => Some(*v),
            StoredValue::Null | StoredValue::Text(_) => None,
        }
    }
}

fn out_of_range(spec: &ColumnSaveSpec, value: impl ToString) -> CoerceError {
    CoerceError::OutOfRange {
        column: spec.name.clone(),
        storage: spec.storage.to_string(),
        value: value.to_string(),
    }
}

fn mismatch(spec: &ColumnSaveSpec, value: impl ToString) -> CoerceError {
    CoerceError::TypeMismatch {
        column: spec.name.clone(),
        storage: spec.storage.to_string(),
        value: value.to_string(),
    }
}

impl ToSql for StoredValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            StoredValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            StoredValue::Integer(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            StoredValue::Real(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
            StoredValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl FromSql for StoredValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => StoredValue::Null,
            ValueRef::Integer(v) => StoredValue::Integer(v),
            ValueRef::Real(v) => StoredValue::Real(v),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                StoredValue::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        })
    }
}
