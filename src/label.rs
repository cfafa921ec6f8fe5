//! Load label generation.
//!
//! A label scopes one load transaction; the store deduplicates resubmissions
//! under the same label. Labels must be unique across concurrent batches, so
//! the generator combines a UTC timestamp with a shared atomic counter rather
//! than relying on the clock alone, which can collide under high submission
//! rates.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::config::LABEL_SUFFIX_DEFAULT;

/// Generates collision-free load labels.
///
/// One generator is shared by all workers of a step; `next` is lock-free and
/// never fails.
#[derive(Debug)]
pub struct LabelGenerator {
    suffix: String,
    counter: AtomicU64,
}

impl Default for LabelGenerator {
    fn default() -> Self {
        Self::new(LABEL_SUFFIX_DEFAULT)
    }
}

impl LabelGenerator {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: sanitize(&suffix.into()),
            counter: AtomicU64::new(0),
        }
    }

    /// Produce the label for the next batch against `table`.
    ///
    /// Shape: `<table>_<utc timestamp>_<sequence>_<suffix>`, restricted to the
    /// store's label charset. The table name keeps labels human-traceable in
    /// the store's job history; the sequence distinguishes concurrent calls.
    pub fn next(&self, table: &str) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let ts = Utc::now().format("%Y%m%d%H%M%S");
        format!("{}_{}_{}_{}", sanitize(table), ts, seq, self.suffix)
    }
}

/// Map anything outside `[A-Za-z0-9_-]` to `_`; the store rejects labels with
/// other characters.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
