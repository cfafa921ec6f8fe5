//! Protocol constants for the stream load client
//!
//! This module centralizes the wire-level names and defaults of the store's
//! stream load API so they exist in exactly one place.

use std::time::Duration;

// ============================================================================
// Request headers
// ============================================================================

pub const LABEL_HEADER: &str = "label";

pub const FORMAT_HEADER: &str = "format";

/// Comma-joined destination column list; required so the store maps
/// positional (CSV) or keyed (JSON) fields onto table columns.
pub const COLUMNS_HEADER: &str = "columns";

pub const FIELD_DELIMITER_HEADER: &str = "column_separator";

pub const LINE_DELIMITER_HEADER: &str = "line_delimiter";

pub const STRIP_OUTER_ARRAY_HEADER: &str = "strip_outer_array";

/// Value for the `Expect` header. Asking the store to confirm before the body
/// is streamed lets a doomed request (bad table, duplicate label) fail without
/// pushing a potentially large encoded batch over the wire.
pub const EXPECT_CONTINUE: &str = "100-continue";

// ============================================================================
// Format defaults
// ============================================================================

pub const FIELD_DELIMITER_DEFAULT: &str = ",";

/// Default CSV line delimiter, in the escaped form headers carry
/// (HTTP header values cannot hold a raw newline).
pub const LINE_DELIMITER_DEFAULT: &str = "\\n";

/// Line delimiter whenever the format is JSON: rows are elements of a JSON
/// array, so the separator is the array element separator regardless of any
/// configured CSV delimiter.
pub const LINE_DELIMITER_JSON: &str = ",";

pub const STRIP_OUTER_ARRAY_DEFAULT: bool = true;

/// Sentinel the store reads as SQL NULL in CSV bodies.
pub const NULL_SENTINEL: &str = "\\N";

// ============================================================================
// Change-data-capture
// ============================================================================

/// Reserved column marking a row for deletion on merge-on-write tables.
/// Sent as `1` for delete rows and `0` for regular rows, and appended to the
/// `columns` header so the store maps it.
pub const DELETE_SIGN_COLUMN: &str = "__DORIS_DELETE_SIGN__";

pub const DELETE_SIGN_TRUE: &str = "1";

pub const DELETE_SIGN_FALSE: &str = "0";

// ============================================================================
// Labels
// ============================================================================

/// Application suffix embedded in generated labels so load transactions are
/// traceable back to this client in the store's job history.
pub const LABEL_SUFFIX_DEFAULT: &str = "bulkload";

// ============================================================================
// Client limits
// ============================================================================

/// Overall per-batch deadline covering the continue-wait, body streaming and
/// response read. Large batches against a busy store can legitimately take
/// minutes; exceeding this is reported as a transport failure and the
/// connection is dropped.
pub const BATCH_DEADLINE_DEFAULT: Duration = Duration::from_secs(600);

/// Default row-count threshold at which the runner closes a batch.
pub const BATCH_MAX_ROWS_DEFAULT: usize = 100_000;

/// Default encoded-size threshold at which the runner closes a batch.
///
/// 64MB keeps a single stream load transaction comfortably below the store's
/// default body limits while still amortizing per-transaction overhead.
pub const BATCH_MAX_BYTES_DEFAULT: u64 = 64 * 1024 * 1024; // 64 MB

/// Redirect hops the client will follow per submission. The store redirects
/// from the coordinator node to the backend ingest node exactly once; anything
/// beyond that is a protocol violation, not load balancing.
pub const MAX_REDIRECTS: u8 = 1;

/// Translate a delimiter from the escaped text form used in headers and
/// configuration (`"\\n"`, `"\\t"`, `"\\x01"`) into the bytes that actually
/// separate fields or rows in the request body.
pub fn unescape_delimiter(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }

        match chars.peek() {
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some('r') => {
                chars.next();
                out.push('\r');
            }
            Some('x') => {
                // \xNN hex escape, used for control-character delimiters
                // like the Hive default \x01. ASCII only: a value >= 0x80
                // would re-encode as two UTF-8 bytes instead of the single
                // delimiter byte.
                chars.next();
                let hi = chars.next();
                let lo = chars.next();
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        let hex: String = [hi, lo].iter().collect();
                        match u8::from_str_radix(&hex, 16) {
                            Ok(byte) if byte.is_ascii() => out.push(byte as char),
                            _ => {
                                out.push('\\');
                                out.push('x');
                                out.push(hi);
                                out.push(lo);
                            }
                        }
                    }
                    _ => {
                        out.push('\\');
                        out.push('x');
                        if let Some(hi) = hi {
                            out.push(hi);
                        }
                    }
                }
            }
            _ => out.push('\\'),
        }
    }

    out
}
