use crate::mask::RowMask;

/// One cell as read from a source file.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Missing,
    Number(f64),
    Text(String),
}

/// Spellings read as missing, matched exactly after trimming.
const MISSING_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

impl Value {
    /// Classify a raw CSV field.
    ///
    /// Empty fields, the usual null/NA spellings and anything that parses to
    /// a NaN are missing; any other float is a number.
    pub fn parse(field: &str) -> Self {
        let field = field.trim();
        if MISSING_MARKERS.contains(&field) || field.eq_ignore_ascii_case("null") {
            return Value::Missing;
        }
        match field.parse::<f64>() {
            Ok(number) if number.is_nan() => Value::Missing,
            Ok(number) => Value::Number(number),
            Err(_) => Value::Text(field.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Missing | Value::Text(_) => None,
        }
    }
}

/// Column-oriented rows of one source file, restricted to the pulled columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceTable {
    names: Vec<String>,
    columns: Vec<Vec<Value>>,
    rows: usize,
}

impl SourceTable {
    pub fn new(names: Vec<String>) -> Self {
        let columns = names.iter().map(|_| Vec::new()).collect();
        Self {
            names,
            columns,
            rows: 0,
        }
    }

    /// Append one row; `values` are in [`SourceTable::names`] order.
    pub fn push_row(&mut self, values: impl IntoIterator<Item = Value>) {
        let mut width = 0;
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.push(value);
            width += 1;
        }
        debug_assert_eq!(width, self.names.len(), "row width mismatch");
        self.rows += 1;
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        let index = self.names.iter().position(|n| n == name)?;
        Some(&self.columns[index])
    }

    /// Rows with a value in every column.
    pub fn complete_rows(&self) -> RowMask {
        let mut mask = RowMask::all(self.rows);
        for column in &self.columns {
            mask.and_inplace(&RowMask::from_fn(self.rows, |row| !column[row].is_missing()));
        }
        mask
    }

    /// A new table holding only the rows set in `mask`, in their original order.
    pub fn select(&self, mask: &RowMask) -> SourceTable {
        debug_assert_eq!(mask.rows(), self.rows, "mask length mismatch");
        let columns = self
            .columns
            .iter()
            .map(|column| mask.iter_ones().map(|row| column[row].clone()).collect())
            .collect();
        SourceTable {
            names: self.names.clone(),
            columns,
            rows: mask.count_ones(),
        }
    }
}
