//! Row model at the pipeline boundary.
//!
//! The pipeline engine hands the loader typed field values together with an
//! insert-or-delete intent per row; everything downstream (batching, encoding,
//! submission) works on these types.

use anyhow::Result;
use async_trait::async_trait;

/// What the store should do with a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOp {
    Insert,
    /// Marks the row for deletion on a merge-on-write table.
    Delete,
}

/// A single typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl FieldValue {
    /// Rough wire size of this value, used for batch byte thresholds.
    /// An estimate, not the exact encoded length.
    pub(crate) fn estimated_len(&self) -> usize {
        match self {
            FieldValue::Null => 2,
            FieldValue::Bool(_) => 5,
            FieldValue::Int(_) => 12,
            FieldValue::Float(_) => 16,
            FieldValue::String(s) => s.len() + 2,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

/// One row of a load batch: field values in column order plus the row intent.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub fields: Vec<FieldValue>,
    pub op: RowOp,
}

impl Row {
    pub fn insert(fields: Vec<FieldValue>) -> Self {
        Self {
            fields,
            op: RowOp::Insert,
        }
    }

    pub fn delete(fields: Vec<FieldValue>) -> Self {
        Self {
            fields,
            op: RowOp::Delete,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.op == RowOp::Delete
    }

    pub(crate) fn estimated_len(&self) -> usize {
        let values: usize = self.fields.iter().map(FieldValue::estimated_len).sum();
        // One delimiter per field boundary plus the row separator.
        values + self.fields.len().saturating_sub(1) + 1
    }
}

/// Source of rows supplied by the pipeline engine.
///
/// The runner pulls rows one at a time until `None`, closing batches at its
/// configured thresholds. Implementations report upstream read failures as
/// errors; a failed source aborts the step.
#[async_trait]
pub trait RowSource: Send {
    async fn next_row(&mut self) -> Result<Option<Row>>;
}

/// In-memory row source, mainly for tests and small fixed batches.
pub struct VecRowSource {
    rows: std::vec::IntoIter<Row>,
}

impl VecRowSource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

#[async_trait]
impl RowSource for VecRowSource {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}
