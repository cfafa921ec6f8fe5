//! The stream load exchange.
//!
//! One submission is an explicit send loop rather than library redirect
//! handling: the body is a live row stream that cannot be replayed once
//! consumed, so a redirect re-issues the request with a fresh encoder over
//! the same batch, under the same label. The store redirects from the
//! coordinator node to the backend ingest node at most once; a second
//! redirect is a protocol violation.

use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use reqwest::header::LOCATION;
use reqwest::{Body, redirect};
use tracing::{debug, info, warn};
use url::Url;

use crate::batch::LoadBatch;
use crate::client::request::{Destination, RequestPlan};
use crate::client::response::{LoadResult, classify};
use crate::config::{BATCH_DEADLINE_DEFAULT, MAX_REDIRECTS};
use crate::encode::RowEncoder;
use crate::error::LoadError;

/// Client for submitting load batches to one destination.
///
/// Cheap to clone; concurrent submissions share the underlying connection
/// pool but nothing batch-scoped.
#[derive(Debug, Clone)]
pub struct StreamLoadClient {
    http: reqwest::Client,
    destination: Destination,
    deadline: Duration,
}

impl StreamLoadClient {
    pub fn new(destination: Destination) -> Result<Self, LoadError> {
        // Redirects are followed by the submit loop, not by reqwest: the
        // built-in policy cannot replay a consumed body stream.
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| LoadError::transport_from("cannot build HTTP client", e))?;
        Ok(Self {
            http,
            destination,
            deadline: BATCH_DEADLINE_DEFAULT,
        })
    }

    /// Overall per-batch deadline covering the continue-wait, body streaming
    /// and response read.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Submit one batch and classify the store's verdict.
    ///
    /// Returns `Ok` when the store accepted the transaction (including
    /// partial acceptance, flagged on the [`LoadResult`]); a store rejection
    /// or any failure before a verdict is an error. The label is spent either
    /// way once the store has answered.
    pub async fn submit(&self, batch: &Arc<LoadBatch>) -> Result<LoadResult, LoadError> {
        batch.validate()?;
        let plan = RequestPlan::new(&self.destination, batch)?;

        debug!(
            label = %batch.label,
            table = %batch.table,
            rows = batch.rows.len(),
            format = batch.format.format.as_str(),
            "submitting stream load"
        );

        match tokio::time::timeout(self.deadline, self.exchange(&plan, batch)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LoadError::transport(format!(
                "load `{}` exceeded the {}s batch deadline; connection dropped, outcome unknown",
                batch.label,
                self.deadline.as_secs()
            ))),
        }
    }

    async fn exchange(
        &self,
        plan: &RequestPlan,
        batch: &Arc<LoadBatch>,
    ) -> Result<LoadResult, LoadError> {
        let mut url = plan.url.clone();
        let mut hops: u8 = 0;

        loop {
            // A fresh encoder per send: the previous attempt's stream may be
            // partially consumed and cannot be rewound.
            let encoder = RowEncoder::new(Arc::clone(batch));
            let body = Body::wrap_stream(stream::iter(encoder));

            let response = self
                .http
                .put(url.clone())
                .headers(plan.headers.clone())
                .basic_auth(&self.destination.user, Some(&self.destination.password))
                .body(body)
                .send()
                .await
                .map_err(|e| {
                    LoadError::transport_from(
                        format!("load `{}`: request to {url} failed", batch.label),
                        e,
                    )
                })?;

            if response.status().is_redirection() {
                if hops >= MAX_REDIRECTS {
                    return Err(LoadError::transport(format!(
                        "load `{}`: second redirect from {url}; refusing to follow",
                        batch.label
                    )));
                }
                url = redirect_target(&url, &response, &batch.label)?;
                hops += 1;
                info!(label = %batch.label, target = %url, "following redirect to ingest node");
                continue;
            }

            let http_status = response.status();
            let text = response.text().await.map_err(|e| {
                LoadError::transport_from(
                    format!("load `{}`: failed reading response body", batch.label),
                    e,
                )
            })?;

            let result = classify(&batch.label, http_status, &text)?;
            if result.is_accepted() {
                if result.is_partial() {
                    warn!(
                        label = %batch.label,
                        filtered = result.filtered_rows,
                        error_url = result.error_url.as_deref().unwrap_or(""),
                        "store filtered rows; load accepted partially"
                    );
                }
                debug!(
                    label = %batch.label,
                    loaded = result.loaded_rows,
                    status = %result.status,
                    "stream load accepted"
                );
                return Ok(result);
            }
            return Err(LoadError::StoreRejection { result });
        }
    }
}

/// Resolve the `Location` of a redirect against the current request URL.
fn redirect_target(
    current: &Url,
    response: &reqwest::Response,
    label: &str,
) -> Result<Url, LoadError> {
    let location = response
        .headers()
        .get(LOCATION)
        .ok_or_else(|| {
            LoadError::transport(format!("load `{label}`: redirect without a Location header"))
        })?
        .to_str()
        .map_err(|_| {
            LoadError::transport(format!("load `{label}`: Location header is not valid text"))
        })?;

    current.join(location).map_err(|e| {
        LoadError::transport(format!(
            "load `{label}`: Location {location:?} is not a valid URL: {e}"
        ))
    })
}
