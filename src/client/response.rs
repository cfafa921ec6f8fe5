//! Stream load response payload and classification.

use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::LoadError;

/// Terminal status of one submission, mapped from the store's `Status` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Success,
    /// The transaction committed but publish confirmation timed out; the data
    /// will become visible, so this is treated as accepted.
    PublishTimeout,
    /// The label was already consumed by an earlier transaction; a new label
    /// is required for any resubmission.
    LabelAlreadyExists,
    /// Any other store-reported failure.
    Fail,
    /// No classified store verdict was observed.
    TransportError,
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            LoadStatus::Success => "Success",
            LoadStatus::PublishTimeout => "Publish Timeout",
            LoadStatus::LabelAlreadyExists => "Label Already Exists",
            LoadStatus::Fail => "Fail",
            LoadStatus::TransportError => "Transport Error",
        };
        f.write_str(text)
    }
}

/// Outcome of one submission as reported by the store.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub label: String,
    pub status: LoadStatus,
    pub loaded_rows: u64,
    pub filtered_rows: u64,
    pub total_rows: u64,
    /// Store's message verbatim, surfaced to operators on failure.
    pub message: Option<String>,
    /// Link to the store's error log when rows were filtered.
    pub error_url: Option<String>,
    /// Status of the job that already holds the label, on a label collision.
    pub existing_job_status: Option<String>,
    pub txn_id: Option<i64>,
    pub load_bytes: Option<u64>,
    pub load_time_ms: Option<u64>,
}

impl LoadResult {
    /// Whether the store accepted the transaction.
    pub fn is_accepted(&self) -> bool {
        matches!(
            self.status,
            LoadStatus::Success | LoadStatus::PublishTimeout
        )
    }

    /// Whether the store accepted the load but filtered some rows. Still a
    /// success at the transport level; the caller decides whether partial
    /// rejection is acceptable.
    pub fn is_partial(&self) -> bool {
        self.is_accepted() && self.filtered_rows > 0
    }
}

/// The store's JSON payload. Fields beyond `Status` default so that older
/// store versions with sparser payloads still classify.
#[derive(Debug, Deserialize)]
struct ResponsePayload {
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Message", default)]
    message: Option<String>,
    #[serde(rename = "NumberTotalRows", default)]
    total_rows: u64,
    #[serde(rename = "NumberLoadedRows", default)]
    loaded_rows: u64,
    #[serde(rename = "NumberFilteredRows", default)]
    filtered_rows: u64,
    #[serde(rename = "ErrorURL", default)]
    error_url: Option<String>,
    #[serde(rename = "ExistingJobStatus", default)]
    existing_job_status: Option<String>,
    #[serde(rename = "TxnId", default)]
    txn_id: Option<i64>,
    #[serde(rename = "LoadBytes", default)]
    load_bytes: Option<u64>,
    #[serde(rename = "LoadTimeMs", default)]
    load_time_ms: Option<u64>,
}

/// Map the store's final response to a [`LoadResult`].
///
/// A body that does not parse as the store payload means no verdict was
/// observed (proxy error page, truncated response) and classifies as a
/// transport failure carrying the HTTP status and a body excerpt.
pub fn classify(label: &str, http_status: StatusCode, body: &str) -> Result<LoadResult, LoadError> {
    let payload: ResponsePayload = serde_json::from_str(body).map_err(|e| {
        LoadError::transport(format!(
            "load `{label}`: response (HTTP {http_status}) is not a stream load payload: {e}; body: {}",
            excerpt(body)
        ))
    })?;

    let status = match payload.status.as_str() {
        "Success" => LoadStatus::Success,
        "Publish Timeout" => LoadStatus::PublishTimeout,
        "Label Already Exists" => LoadStatus::LabelAlreadyExists,
        _ => LoadStatus::Fail,
    };

    Ok(LoadResult {
        label: label.to_string(),
        status,
        loaded_rows: payload.loaded_rows,
        filtered_rows: payload.filtered_rows,
        total_rows: payload.total_rows,
        message: payload.message,
        error_url: payload.error_url,
        existing_job_status: payload.existing_job_status,
        txn_id: payload.txn_id,
        load_bytes: payload.load_bytes,
        load_time_ms: payload.load_time_ms,
    })
}

fn excerpt(body: &str) -> &str {
    let end = body
        .char_indices()
        .take(200)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &body[..end]
}
