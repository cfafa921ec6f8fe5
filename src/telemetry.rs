/// Telemetry events sent from submission tasks to the runner for progress
/// tracking.
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// A batch was handed to the client for submission.
    BatchStarted { label: String, rows: u64 },
    /// The store accepted a batch.
    BatchCompleted {
        label: String,
        rows_loaded: u64,
        rows_filtered: u64,
        bytes_sent: u64,
        duration_ms: u64,
    },
    /// A batch failed terminally.
    BatchFailed { label: String, message: String },
}

/// Statistics aggregated from telemetry events.
#[derive(Debug, Default, Clone)]
pub struct StepStats {
    pub batches_started: usize,
    pub batches_completed: usize,
    pub batches_failed: usize,
    pub rows_loaded: u64,
    pub rows_filtered: u64,
    pub bytes_sent: u64,
    pub batch_durations_ms: Vec<u64>,
}

impl StepStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::BatchStarted { .. } => {
                self.batches_started += 1;
            }
            TelemetryEvent::BatchCompleted {
                rows_loaded,
                rows_filtered,
                bytes_sent,
                duration_ms,
                ..
            } => {
                self.batches_completed += 1;
                self.rows_loaded += rows_loaded;
                self.rows_filtered += rows_filtered;
                self.bytes_sent += bytes_sent;
                self.batch_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::BatchFailed { .. } => {
                self.batches_failed += 1;
            }
        }
    }

    /// Calculate percentile from batch durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.batch_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.batch_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}
