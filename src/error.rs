//! Error taxonomy for stream load submissions
//!
//! The variants follow the retry rules of the store's label protocol: a
//! rejection observed from the store definitively consumed its label, while a
//! transport failure leaves the label's outcome unknown. Callers must never
//! resubmit under a label whose outcome is unknown unless they have confirmed
//! out of band that the store never accepted it.

use thiserror::Error;

pub use crate::client::response::{LoadResult, LoadStatus};

/// Failure modes of one load submission.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Invalid destination, column list or format combination. Detected
    /// before any request is built; never retried.
    #[error("invalid load configuration: {message}")]
    Configuration { message: String },

    /// A row could not be represented in the configured wire format. The
    /// batch is aborted: a corrupted stream cannot be un-sent mid-flight.
    #[error("row cannot be encoded: {message}")]
    Encoding { message: String },

    /// Connection failure, timeout, or a malformed response before any store
    /// verdict was observed. The label's outcome is indeterminate.
    #[error("transport failure: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The transport exchange completed but the store reported a load
    /// failure. The label is spent; resubmission requires a fresh label.
    #[error(
        "store rejected load `{}`: {} ({})",
        result.label,
        result.status,
        result.message.as_deref().unwrap_or("no message")
    )]
    StoreRejection { result: LoadResult },

    /// The submission was cancelled mid-flight. The connection was closed
    /// without waiting for a verdict, so the label's outcome is unknown.
    #[error("load `{label}` cancelled mid-flight; outcome indeterminate")]
    Cancelled { label: String },
}

impl LoadError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        LoadError::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn encoding(message: impl Into<String>) -> Self {
        LoadError::Encoding {
            message: message.into(),
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        LoadError::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn transport_from(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        LoadError::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether the store definitively observed and answered this submission.
    ///
    /// `true` means the label is spent and a resubmission needs a new label.
    /// `false` means the outcome is indeterminate: the store may or may not
    /// have accepted the batch, and the same label may only be reused once an
    /// operator confirms the prior attempt never succeeded.
    pub fn outcome_observed(&self) -> bool {
        match self {
            LoadError::StoreRejection { .. } => true,
            LoadError::Configuration { .. } | LoadError::Encoding { .. } => true,
            LoadError::Transport { .. } | LoadError::Cancelled { .. } => false,
        }
    }
}
