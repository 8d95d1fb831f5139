use std::fmt;
use std::str::FromStr;

use crate::CatalogError;

/// Value domain of a persisted column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    /// Fixed-point number with `precision` total digits, `scale` of them after the point.
    Decimal { precision: u8, scale: u8 },
    Double,
    /// Unsigned 64-bit integer (spatial cell identifiers).
    UBigInt,
    BigInt,
    Text,
}

/// Storage type of a persisted column, as written in catalog documents
/// (`decimal(4,2)`, `double not null`, `ubigint not null`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageType {
    pub kind: StorageKind,
    pub not_null: bool,
}

impl StorageType {
    pub const fn new(kind: StorageKind) -> Self {
        Self {
            kind,
            not_null: false,
        }
    }

    pub const fn decimal(precision: u8, scale: u8) -> Self {
        Self::new(StorageKind::Decimal { precision, scale })
    }

    pub const fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// SQLite column declaration (type affinity plus nullability).
    ///
    /// Decimals are declared `REAL` rather than `DECIMAL(p,s)` so SQLite's
    /// NUMERIC affinity does not silently turn `12.00` into the integer `12`.
    pub fn sql_declaration(&self) -> String {
        let affinity = match self.kind {
            StorageKind::Decimal { .. } | StorageKind::Double => "REAL",
            StorageKind::UBigInt | StorageKind::BigInt => "INTEGER",
            StorageKind::Text => "TEXT",
        };
        if self.not_null {
            format!("{affinity} NOT NULL")
        } else {
            affinity.to_string()
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StorageKind::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})")?,
            StorageKind::Double => f.write_str("double")?,
            StorageKind::UBigInt => f.write_str("ubigint")?,
            StorageKind::BigInt => f.write_str("bigint")?,
            StorageKind::Text => f.write_str("text")?,
        }
        if self.not_null {
            f.write_str(" not null")?;
        }
        Ok(())
    }
}

impl FromStr for StorageType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CatalogError::InvalidStorageType(s.to_string());

        let lowered = squeeze_parens(&s.trim().to_ascii_lowercase());
        let words: Vec<&str> = lowered.split_whitespace().collect();
        let (base, not_null) = match words.as_slice() {
            [base] => (*base, false),
            [base, "not", "null"] => (*base, true),
            _ => return Err(invalid()),
        };

        let kind = match base {
            "double" | "real" | "float" | "float8" => StorageKind::Double,
            "ubigint" => StorageKind::UBigInt,
            "bigint" | "integer" | "int" | "int8" => StorageKind::BigInt,
            "text" | "string" | "varchar" => StorageKind::Text,
            other => {
                let args = other
                    .strip_prefix("decimal(")
                    .or_else(|| other.strip_prefix("numeric("))
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(invalid)?;
                let (precision, scale) = args.split_once(',').ok_or_else(invalid)?;
                let precision: u8 = precision.trim().parse().map_err(|_| invalid())?;
                let scale: u8 = scale.trim().parse().map_err(|_| invalid())?;
                // f64 carries ~15 significant digits; wider decimals would not round-trip.
                if precision == 0 || precision > 15 || scale > precision {
                    return Err(invalid());
                }
                StorageKind::Decimal { precision, scale }
            }
        };

        Ok(StorageType { kind, not_null })
    }
}

/// Drop whitespace inside parentheses so `decimal( 6 , 2 )` reads as one word.
fn squeeze_parens(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0usize;
    for ch in s.chars() {
        match ch {
            '(' => {
                depth += 1;
                out.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                out.push(ch);
            }
            c if c.is_whitespace() && depth > 0 => {}
            c => out.push(c),
        }
    }
    out
}
