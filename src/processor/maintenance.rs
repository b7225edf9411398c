use crate::processor::Processor;
use crate::storage::{with_timeout, AggregationSnapshot};
use crate::window::aggregate::{average_of, error_rate_of};
use crate::window::{Sample, WindowKey, WindowStats};
use serde::Serialize;
use tracing::{debug, error, info};

/// Outcome of one flush pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub written: usize,
    pub skipped_empty: usize,
    pub failed: usize,
}

impl Processor {
    /// Persist one snapshot per non-empty window.
    ///
    /// All windows are read before the first write is awaited, so the pass
    /// sees a single consistent instant.
    pub async fn flush(&mut self) -> FlushReport {
        let now = self.clock.now_ms();
        let window_size_ms = self.windows.window_size_ms();
        let mut report = FlushReport::default();
        let mut pending = Vec::new();

        for key in self.windows.keys() {
            let samples = self.windows.read(&key, now);
            if samples.is_empty() {
                report.skipped_empty += 1;
                continue;
            }
            match WindowKey::parse(&key) {
                Some(kind) => pending.push(snapshot_for(&kind, &key, &samples, window_size_ms, now)),
                None => debug!(window_key = %key, "No aggregate for window, not flushed"),
            }
        }

        for snapshot in pending {
            let call = self.store.store_aggregation_snapshot(&snapshot);
            match with_timeout(self.op_timeout, call).await {
                Ok(_) => report.written += 1,
                Err(e) => {
                    error!(
                        window_key = %snapshot.window_key,
                        metric_type = %snapshot.metric_type,
                        error = %e,
                        "Failed to store aggregation snapshot"
                    );
                    report.failed += 1;
                }
            }
        }

        self.stats.snapshots_written += report.written as u64;
        debug!(?report, "Flushed aggregations");
        report
    }

    /// Drop windows idle for longer than the configured maximum.
    pub fn reap(&mut self) -> usize {
        let now = self.clock.now_ms();
        let reaped = self.windows.reap_idle(self.max_idle_ms, now);
        if !reaped.is_empty() {
            info!(count = reaped.len(), keys = ?reaped, "Reaped idle windows");
        }
        self.stats.windows_reaped += reaped.len() as u64;
        reaped.len()
    }
}

fn snapshot_for(
    kind: &WindowKey,
    key: &str,
    samples: &[Sample],
    window_size_ms: i64,
    now: i64,
) -> AggregationSnapshot {
    let stats = WindowStats::from_samples(key, samples, window_size_ms, now);
    let mut metadata = serde_json::to_value(&stats).unwrap_or_default();

    let (metric_type, value) = match kind {
        WindowKey::LogsErrorRate => ("error_rate", error_rate_of(samples)),
        WindowKey::EventsFrequency => ("event_count", samples.len() as f64),
        WindowKey::Metric(name) => {
            // An average of 0 is ambiguous on its own; record how many samples fed it.
            let numeric = samples
                .iter()
                .filter(|s| s.field(name).and_then(|v| v.as_f64()).is_some())
                .count();
            metadata["numeric_count"] = numeric.into();
            metadata["field"] = name.as_str().into();
            ("average", average_of(samples, name))
        }
    };

    AggregationSnapshot {
        window_key: key.to_string(),
        metric_type: metric_type.to_string(),
        value,
        count: samples.len() as i64,
        window_start: now.saturating_sub(window_size_ms),
        window_end: now,
        metadata,
    }
}
