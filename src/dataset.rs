//! Tabular input model for chunking strategies.
//!
//! A [`Dataset`] is an ordered sequence of rows, each mapping a column name to
//! a scalar JSON value. Column order is carried explicitly so text rendering
//! is deterministic regardless of map iteration order. Datasets are read-only
//! inputs: strategies slice rows out of them but never mutate the source.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::RagError;

/// One row: column name to scalar value. A missing key or an explicit
/// `Value::Null` both mean "absent".
pub type Row = FxHashMap<String, Value>;

/// An immutable, ordered table of rows.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Dataset {
    /// Create a dataset from explicit column order and rows.
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Build a dataset from `(column, value)` tuples per row, inferring the
    /// column order from first appearance.
    pub fn from_records<I, R>(records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (String, Value)>,
    {
        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        for record in records {
            let mut row = Row::default();
            for (column, value) in record {
                if !columns.contains(&column) {
                    columns.push(column.clone());
                }
                row.insert(column, value);
            }
            rows.push(row);
        }
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> Option<&Row> {
        self.rows.get(idx)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Clone the rows in `range` out of the dataset.
    ///
    /// The range is clamped to the dataset bounds.
    pub fn slice(&self, start: usize, end: usize) -> Vec<Row> {
        let end = end.min(self.rows.len());
        if start >= end {
            return Vec::new();
        }
        self.rows[start..end].to_vec()
    }

    /// Validate that the dataset is usable as chunking input.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.columns.is_empty() {
            return Err(RagError::InvalidParameter(
                "dataset must have at least one column".into(),
            ));
        }
        if self.rows.is_empty() {
            return Err(RagError::InvalidParameter("dataset cannot be empty".into()));
        }
        Ok(())
    }
}

/// Render a scalar value for row text, or `None` when the value is absent.
///
/// Strings render without quotes; everything else uses its JSON form.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
