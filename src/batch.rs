//! Load batches: the unit of one stream load transaction.

use crate::encode::{Format, FormatConfig};
use crate::error::LoadError;
use crate::rows::{FieldValue, Row};

/// An ordered sequence of rows submitted under one label.
///
/// All rows share the batch's column list and format. A batch is submitted at
/// most once per label value; the label is the idempotency key the store uses
/// to dedupe retried submissions, and is never reused once a terminal response
/// has been observed for it.
#[derive(Debug, Clone)]
pub struct LoadBatch {
    pub database: String,
    pub table: String,
    pub columns: Vec<String>,
    pub label: String,
    pub format: FormatConfig,
    /// Whether the destination table uses merge-on-write semantics. When set,
    /// every encoded row carries the delete-sign column and delete-intent rows
    /// are accepted; when unset, delete rows are rejected up front.
    pub merge_on_write: bool,
    pub rows: Vec<Row>,
}

impl LoadBatch {
    /// Check the batch before any request is built.
    ///
    /// Rejects shapes the store would refuse or that cannot be encoded:
    /// a corrupted stream cannot be un-sent mid-flight, so everything
    /// checkable up front is checked here.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.database.is_empty() {
            return Err(LoadError::config("destination database is empty"));
        }
        if self.table.is_empty() {
            return Err(LoadError::config("destination table is empty"));
        }
        if self.label.is_empty() {
            return Err(LoadError::config("load label is empty"));
        }
        if self.columns.is_empty() {
            return Err(LoadError::config("column list is empty"));
        }
        if self.rows.is_empty() {
            return Err(LoadError::config(format!(
                "batch `{}` has no rows; refusing to spend a label on an empty load",
                self.label
            )));
        }

        for (idx, row) in self.rows.iter().enumerate() {
            if row.fields.len() != self.columns.len() {
                return Err(LoadError::config(format!(
                    "row {idx} has {} fields but the batch declares {} columns",
                    row.fields.len(),
                    self.columns.len()
                )));
            }
            if row.is_delete() && !self.merge_on_write {
                return Err(LoadError::config(format!(
                    "row {idx} carries delete intent but table `{}` is not merge-on-write",
                    self.table
                )));
            }
            if self.format.format == Format::Json {
                for (col, field) in self.columns.iter().zip(&row.fields) {
                    if let FieldValue::Float(f) = field {
                        if !f.is_finite() {
                            return Err(LoadError::encoding(format!(
                                "row {idx} column `{col}`: {f} has no JSON representation"
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Estimated encoded size, used by the runner's byte threshold.
    pub fn estimated_bytes(&self) -> u64 {
        self.rows.iter().map(|r| r.estimated_len() as u64).sum()
    }
}
