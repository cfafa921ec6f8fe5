//! Row encoding into the stream load body.
//!
//! The encoder is a single forward pass over the batch, yielding one chunk
//! per row (plus JSON array brackets). It never needs the whole encoded body
//! in memory, so batch size does not affect the client's footprint; a
//! submission that must be replayed (redirect) constructs a fresh encoder
//! from the same batch.

use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::batch::LoadBatch;
use crate::config::{DELETE_SIGN_COLUMN, DELETE_SIGN_FALSE, DELETE_SIGN_TRUE, NULL_SENTINEL};
use crate::encode::Format;
use crate::error::LoadError;
use crate::rows::{FieldValue, Row};

/// Lazy encoder for one batch.
///
/// Encoding is a pure function of rows and config: two encoders over the same
/// batch produce byte-identical output. CSV output assumes upstream has kept
/// the configured delimiters out of field values; the encoder applies no
/// escaping.
pub struct RowEncoder {
    batch: Arc<LoadBatch>,
    field_delimiter: String,
    line_delimiter: String,
    next_row: usize,
    open_emitted: bool,
    close_emitted: bool,
    failed: bool,
}

impl RowEncoder {
    pub fn new(batch: Arc<LoadBatch>) -> Self {
        let field_delimiter = batch.format.field_delimiter_bytes();
        let line_delimiter = batch.format.line_delimiter_bytes();
        Self {
            batch,
            field_delimiter,
            line_delimiter,
            next_row: 0,
            open_emitted: false,
            close_emitted: false,
            failed: false,
        }
    }

    /// Whether the body is wrapped in a top-level JSON array. Must agree with
    /// the `strip_outer_array` header or the store rejects the load.
    fn wraps_array(&self) -> bool {
        self.batch.format.format == Format::Json && !self.batch.format.strip_outer_array
    }

    fn encode_row(&self, row: &Row) -> Result<String, LoadError> {
        match self.batch.format.format {
            Format::Csv => Ok(self.encode_csv_row(row)),
            Format::Json => self.encode_json_row(row),
        }
    }

    fn encode_csv_row(&self, row: &Row) -> String {
        let mut out = String::new();
        for (idx, field) in row.fields.iter().enumerate() {
            if idx > 0 {
                out.push_str(&self.field_delimiter);
            }
            match field {
                FieldValue::Null => out.push_str(NULL_SENTINEL),
                FieldValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
                FieldValue::Int(i) => out.push_str(&i.to_string()),
                FieldValue::Float(f) => out.push_str(&f.to_string()),
                FieldValue::String(s) => out.push_str(s),
            }
        }
        if self.batch.merge_on_write {
            out.push_str(&self.field_delimiter);
            out.push_str(if row.is_delete() {
                DELETE_SIGN_TRUE
            } else {
                DELETE_SIGN_FALSE
            });
        }
        out
    }

    fn encode_json_row(&self, row: &Row) -> Result<String, LoadError> {
        let mut object = Map::with_capacity(row.fields.len() + 1);
        for (column, field) in self.batch.columns.iter().zip(&row.fields) {
            let value = match field {
                FieldValue::Null => Value::Null,
                FieldValue::Bool(b) => Value::Bool(*b),
                FieldValue::Int(i) => Value::Number(Number::from(*i)),
                FieldValue::Float(f) => Number::from_f64(*f)
                    .map(Value::Number)
                    .ok_or_else(|| {
                        LoadError::encoding(format!(
                            "column `{column}`: {f} has no JSON representation"
                        ))
                    })?,
                FieldValue::String(s) => Value::String(s.clone()),
            };
            object.insert(column.clone(), value);
        }
        if self.batch.merge_on_write {
            let sign = if row.is_delete() { 1 } else { 0 };
            object.insert(
                DELETE_SIGN_COLUMN.to_string(),
                Value::Number(Number::from(sign)),
            );
        }
        serde_json::to_string(&Value::Object(object))
            .map_err(|e| LoadError::encoding(format!("row serialization failed: {e}")))
    }
}

impl Iterator for RowEncoder {
    type Item = Result<Vec<u8>, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if self.wraps_array() && !self.open_emitted {
            self.open_emitted = true;
            return Some(Ok(b"[".to_vec()));
        }

        if self.next_row < self.batch.rows.len() {
            let row = &self.batch.rows[self.next_row];
            let mut chunk = String::new();
            if self.next_row > 0 {
                chunk.push_str(&self.line_delimiter);
            }
            match self.encode_row(row) {
                Ok(encoded) => chunk.push_str(&encoded),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
            self.next_row += 1;
            return Some(Ok(chunk.into_bytes()));
        }

        if self.wraps_array() && !self.close_emitted {
            self.close_emitted = true;
            return Some(Ok(b"]".to_vec()));
        }

        None
    }
}
