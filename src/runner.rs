//! High-level runner API for the stream load client.
//!
//! This is the surface a pipeline step calls: it pulls rows from a
//! [`RowSource`], closes batches at the configured row/byte thresholds, mints
//! a label per batch, and submits with bounded concurrency. Each in-flight
//! batch owns its label, encoder and request; the only shared state is the
//! label generator and the client's connection pool.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use derive_builder::Builder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::LoadBatch;
use crate::client::{Destination, LoadResult, StreamLoadClient};
use crate::config::{
    BATCH_DEADLINE_DEFAULT, BATCH_MAX_BYTES_DEFAULT, BATCH_MAX_ROWS_DEFAULT, LABEL_SUFFIX_DEFAULT,
};
use crate::encode::FormatConfig;
use crate::error::LoadError;
use crate::label::LabelGenerator;
use crate::rows::{Row, RowSource};
use crate::telemetry::TelemetryEvent;

/// Settings for one load step.
#[derive(Debug, Clone, Builder)]
pub struct LoadSettings {
    pub destination: Destination,
    #[builder(setter(into))]
    pub database: String,
    #[builder(setter(into))]
    pub table: String,
    pub columns: Vec<String>,
    #[builder(default)]
    pub format: FormatConfig,
    #[builder(default)]
    pub merge_on_write: bool,
    /// Row-count threshold at which a batch is closed and submitted.
    #[builder(default = "BATCH_MAX_ROWS_DEFAULT")]
    pub batch_max_rows: usize,
    /// Estimated-encoded-size threshold at which a batch is closed.
    #[builder(default = "BATCH_MAX_BYTES_DEFAULT")]
    pub batch_max_bytes: u64,
    /// Batches in flight at once.
    #[builder(default = "4")]
    pub submit_concurrency: usize,
    /// Per-batch deadline for the whole HTTP exchange.
    #[builder(default = "BATCH_DEADLINE_DEFAULT")]
    pub deadline: Duration,
    #[builder(setter(into), default = "LABEL_SUFFIX_DEFAULT.to_string()")]
    pub label_suffix: String,
}

impl LoadSettings {
    pub fn builder() -> LoadSettingsBuilder {
        LoadSettingsBuilder::default()
    }
}

/// Result of one load step, aggregated over all its batches.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StepSummary {
    pub step_id: String,
    pub batches_submitted: u64,
    pub rows_loaded: u64,
    pub rows_filtered: u64,
    pub bytes_sent: u64,
    pub started_at: String,
    pub completed_at: String,
    pub duration_ms: u64,
}

/// Outcome of one submission task. Errors travel as data so telemetry and
/// aggregation stay in one place.
struct BatchOutcome {
    label: String,
    rows: u64,
    estimated_bytes: u64,
    duration_ms: u64,
    result: Result<LoadResult, LoadError>,
}

/// Run one load step to completion.
///
/// `telemetry_tx` receives per-batch progress events when supplied. `cancel`
/// aborts the step when it flips to `true`: intake stops and in-flight
/// submissions are dropped mid-exchange, so their labels' outcomes are
/// indeterminate and the step fails.
///
/// The first terminal batch failure stops intake, waits for the remaining
/// in-flight batches, and fails the step with the store's message in the
/// error chain.
pub async fn run_step(
    mut source: impl RowSource,
    settings: LoadSettings,
    telemetry_tx: Option<mpsc::UnboundedSender<TelemetryEvent>>,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<StepSummary> {
    let step_id = Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let start_instant = std::time::Instant::now();
    let concurrency = settings.submit_concurrency.max(1);

    let client = StreamLoadClient::new(settings.destination.clone())
        .map_err(anyhow::Error::new)
        .context("Failed to build stream load client")?
        .with_deadline(settings.deadline);
    let labels = Arc::new(LabelGenerator::new(settings.label_suffix.clone()));

    info!(
        step_id = %step_id,
        database = %settings.database,
        table = %settings.table,
        format = settings.format.format.as_str(),
        "starting load step"
    );

    let mut join_set: JoinSet<BatchOutcome> = JoinSet::new();
    let mut summary = Aggregation::default();
    let mut first_failure: Option<(String, LoadError)> = None;

    let mut pending: Vec<Row> = Vec::new();
    let mut pending_bytes: u64 = 0;

    'intake: loop {
        if is_cancelled(&cancel) {
            break 'intake;
        }

        let row = match source.next_row().await {
            Ok(Some(row)) => row,
            Ok(None) => break 'intake,
            Err(e) => {
                // Upstream failed; what was already submitted stands.
                drain_all(&mut join_set, &telemetry_tx, &mut summary, &mut first_failure).await;
                return Err(e.context(format!("step {step_id}: row source failed")));
            }
        };

        pending_bytes += row.estimated_len() as u64;
        pending.push(row);

        if pending.len() >= settings.batch_max_rows || pending_bytes >= settings.batch_max_bytes {
            let rows = std::mem::take(&mut pending);
            pending_bytes = 0;
            submit(
                &mut join_set,
                concurrency,
                &client,
                &settings,
                &labels,
                &telemetry_tx,
                &cancel,
                &mut summary,
                &mut first_failure,
                rows,
            )
            .await;
            if first_failure.is_some() {
                break 'intake;
            }
        }
    }

    // Trailing partial batch, unless the step is already failing or cancelled.
    if !pending.is_empty() && first_failure.is_none() && !is_cancelled(&cancel) {
        submit(
            &mut join_set,
            concurrency,
            &client,
            &settings,
            &labels,
            &telemetry_tx,
            &cancel,
            &mut summary,
            &mut first_failure,
            pending,
        )
        .await;
    }

    drain_all(&mut join_set, &telemetry_tx, &mut summary, &mut first_failure).await;

    if is_cancelled(&cancel) && first_failure.is_none() {
        return Err(anyhow!("step {step_id}: cancelled before completion"));
    }

    if let Some((label, error)) = first_failure {
        return Err(anyhow::Error::new(error)
            .context(format!("step {step_id}: batch `{label}` failed terminally")));
    }

    let completed_at = Utc::now();
    let result = StepSummary {
        step_id,
        batches_submitted: summary.batches_submitted,
        rows_loaded: summary.rows_loaded,
        rows_filtered: summary.rows_filtered,
        bytes_sent: summary.bytes_sent,
        started_at: started_at.to_rfc3339(),
        completed_at: completed_at.to_rfc3339(),
        duration_ms: start_instant.elapsed().as_millis() as u64,
    };

    info!(
        step_id = %result.step_id,
        batches = result.batches_submitted,
        rows_loaded = result.rows_loaded,
        rows_filtered = result.rows_filtered,
        duration_ms = result.duration_ms,
        "load step complete"
    );

    Ok(result)
}

#[derive(Default)]
struct Aggregation {
    batches_submitted: u64,
    rows_loaded: u64,
    rows_filtered: u64,
    bytes_sent: u64,
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Resolves when the watch flips to `true`; never resolves without a cancel
/// signal.
async fn cancellation(rx: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = rx {
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
    futures::future::pending::<()>().await
}

#[allow(clippy::too_many_arguments)]
async fn submit(
    join_set: &mut JoinSet<BatchOutcome>,
    concurrency: usize,
    client: &StreamLoadClient,
    settings: &LoadSettings,
    labels: &Arc<LabelGenerator>,
    telemetry_tx: &Option<mpsc::UnboundedSender<TelemetryEvent>>,
    cancel: &Option<watch::Receiver<bool>>,
    summary: &mut Aggregation,
    first_failure: &mut Option<(String, LoadError)>,
    rows: Vec<Row>,
) {
    // Wait if we've reached the concurrency limit.
    while join_set.len() >= concurrency {
        if let Some(joined) = join_set.join_next().await {
            absorb(joined, telemetry_tx, summary, first_failure);
            if first_failure.is_some() {
                return;
            }
        }
    }

    let label = labels.next(&settings.table);
    let batch = Arc::new(LoadBatch {
        database: settings.database.clone(),
        table: settings.table.clone(),
        columns: settings.columns.clone(),
        label: label.clone(),
        format: settings.format.clone(),
        merge_on_write: settings.merge_on_write,
        rows,
    });

    if let Some(tx) = telemetry_tx {
        let _ = tx.send(TelemetryEvent::BatchStarted {
            label: label.clone(),
            rows: batch.rows.len() as u64,
        });
    }
    summary.batches_submitted += 1;

    let client = client.clone();
    let cancel = cancel.clone();
    join_set.spawn(async move {
        let rows = batch.rows.len() as u64;
        let estimated_bytes = batch.estimated_bytes();
        let start = std::time::Instant::now();

        // Dropping the submit future on cancellation closes the connection
        // mid-exchange; the label's outcome becomes indeterminate.
        let result = tokio::select! {
            biased;
            _ = cancellation(cancel) => Err(LoadError::Cancelled {
                label: batch.label.clone(),
            }),
            outcome = client.submit(&batch) => outcome,
        };

        BatchOutcome {
            label: batch.label.clone(),
            rows,
            estimated_bytes,
            duration_ms: start.elapsed().as_millis() as u64,
            result,
        }
    });
}

/// Fold one finished task into the step aggregation and telemetry.
fn absorb(
    joined: Result<BatchOutcome, tokio::task::JoinError>,
    telemetry_tx: &Option<mpsc::UnboundedSender<TelemetryEvent>>,
    summary: &mut Aggregation,
    first_failure: &mut Option<(String, LoadError)>,
) {
    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            if first_failure.is_none() {
                *first_failure = Some((
                    "<unknown>".to_string(),
                    LoadError::transport(format!("submission task panicked: {e}")),
                ));
            }
            return;
        }
    };

    match outcome.result {
        Ok(result) => {
            debug!(
                label = %outcome.label,
                loaded = result.loaded_rows,
                filtered = result.filtered_rows,
                duration_ms = outcome.duration_ms,
                "batch accepted"
            );
            summary.rows_loaded += result.loaded_rows;
            summary.rows_filtered += result.filtered_rows;
            summary.bytes_sent += result.load_bytes.unwrap_or(outcome.estimated_bytes);
            if let Some(tx) = telemetry_tx {
                let _ = tx.send(TelemetryEvent::BatchCompleted {
                    label: outcome.label,
                    rows_loaded: result.loaded_rows,
                    rows_filtered: result.filtered_rows,
                    bytes_sent: result.load_bytes.unwrap_or(outcome.estimated_bytes),
                    duration_ms: outcome.duration_ms,
                });
            }
        }
        Err(error) => {
            warn!(
                label = %outcome.label,
                rows = outcome.rows,
                error = %error,
                "batch failed"
            );
            if let Some(tx) = telemetry_tx {
                let _ = tx.send(TelemetryEvent::BatchFailed {
                    label: outcome.label.clone(),
                    message: error.to_string(),
                });
            }
            if first_failure.is_none() {
                *first_failure = Some((outcome.label, error));
            }
        }
    }
}

/// Wait for every in-flight batch. Labels already submitted are spent whether
/// or not the step is failing, so results are always folded in.
async fn drain_all(
    join_set: &mut JoinSet<BatchOutcome>,
    telemetry_tx: &Option<mpsc::UnboundedSender<TelemetryEvent>>,
    summary: &mut Aggregation,
    first_failure: &mut Option<(String, LoadError)>,
) {
    while let Some(joined) = join_set.join_next().await {
        absorb(joined, telemetry_tx, summary, first_failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_builder_applies_defaults() {
        let settings = LoadSettings::builder()
            .destination(
                Destination::builder()
                    .host("doris-fe")
                    .port(8030u16)
                    .build()
                    .unwrap(),
            )
            .database("demo")
            .table("orders")
            .columns(vec!["id".to_string()])
            .build()
            .unwrap();

        assert_eq!(settings.batch_max_rows, BATCH_MAX_ROWS_DEFAULT);
        assert_eq!(settings.batch_max_bytes, BATCH_MAX_BYTES_DEFAULT);
        assert_eq!(settings.submit_concurrency, 4);
        assert_eq!(settings.deadline, BATCH_DEADLINE_DEFAULT);
        assert_eq!(settings.label_suffix, LABEL_SUFFIX_DEFAULT);
        assert!(!settings.merge_on_write);
        assert_eq!(settings.format, FormatConfig::csv());
    }

    #[test]
    fn settings_builder_requires_destination() {
        let result = LoadSettings::builder()
            .database("demo")
            .table("orders")
            .columns(vec!["id".to_string()])
            .build();
        assert!(result.is_err());
    }
}
