use crate::detect::{evaluate, Breach, DedupOutcome, IncidentDeduplicator, NewIncident, STATUS_OPEN};
use tracing::warn;

/// `source` recorded on error-rate incidents.
pub const ERROR_RATE_SOURCE: &str = "error_rate_monitor";
/// Stable title, so every error-rate breach dedups against the same key.
pub const ERROR_RATE_TITLE: &str = "High Error Rate Detected";

/// Turns the log error rate into incidents.
pub struct ErrorRateMonitor {
    dedup: IncidentDeduplicator,
    threshold: f64,
    min_samples: usize,
    window_size_ms: i64,
}

impl ErrorRateMonitor {
    pub fn new(dedup: IncidentDeduplicator, threshold: f64, min_samples: usize, window_size_ms: i64) -> Self {
        Self {
            dedup,
            threshold,
            min_samples,
            window_size_ms,
        }
    }

    /// Evaluate the current rate; on breach, create an incident unless one is
    /// still cooling down. `None` means no breach.
    pub async fn observe(&self, error_rate: f64, sample_count: usize, now: i64) -> Option<DedupOutcome> {
        let breach = evaluate(error_rate, sample_count, self.threshold, self.min_samples)?;
        let outcome = self.dedup.create_unless_recent(self.incident_for(&breach, now)).await;

        if let DedupOutcome::Created(id) = outcome {
            warn!(
                incident = %id,
                error_rate,
                sample_count,
                threshold = self.threshold,
                severity = %breach.severity,
                "Created error rate incident"
            );
        }
        Some(outcome)
    }

    fn incident_for(&self, breach: &Breach, now: i64) -> NewIncident {
        NewIncident {
            title: ERROR_RATE_TITLE.to_string(),
            description: format!(
                "Error rate of {:.1}% detected over {} log messages in the last {}s",
                breach.value * 100.0,
                breach.sample_count,
                self.window_size_ms / 1000
            ),
            severity: breach.severity,
            source: ERROR_RATE_SOURCE.to_string(),
            status: STATUS_OPEN.to_string(),
            metadata: serde_json::json!({
                "error_rate": breach.value,
                "sample_count": breach.sample_count,
                "threshold": breach.threshold,
                "window_size_ms": self.window_size_ms,
            }),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Severity;
    use crate::storage::{open_memory_pool, SqliteStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn monitor() -> (ErrorRateMonitor, SqliteStore) {
        let store = SqliteStore::new(open_memory_pool().unwrap());
        let dedup = IncidentDeduplicator::new(Arc::new(store.clone()), 1, Duration::from_secs(5));
        (ErrorRateMonitor::new(dedup, 0.05, 10, 60_000), store)
    }

    #[tokio::test]
    async fn test_below_gate_creates_nothing() {
        let (monitor, store) = monitor();
        assert!(monitor.observe(1.0, 9, 0).await.is_none());
        assert!(monitor.observe(0.04, 50, 0).await.is_none());
        assert!(store.list_recent_incidents(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_incident_carries_operator_context() {
        let (monitor, store) = monitor();
        let outcome = monitor.observe(6.0 / 11.0, 11, 1_000).await;
        assert!(matches!(outcome, Some(DedupOutcome::Created(_))));

        let incidents = store.list_recent_incidents(10).unwrap();
        assert_eq!(incidents.len(), 1);
        let inc = &incidents[0];
        assert_eq!(inc.title, ERROR_RATE_TITLE);
        assert_eq!(inc.source, ERROR_RATE_SOURCE);
        assert_eq!(inc.severity, Severity::High);
        assert!(inc.description.contains("54.5%"), "{}", inc.description);
        assert!(inc.description.contains("11 log messages"));
        assert!(inc.description.contains("last 60s"));
        assert_eq!(inc.metadata["sample_count"], 11);
        assert_eq!(inc.metadata["threshold"], 0.05);
        assert_eq!(inc.metadata["window_size_ms"], 60_000);
    }

    #[tokio::test]
    async fn test_medium_severity_below_double_threshold() {
        let (monitor, store) = monitor();
        monitor.observe(0.08, 25, 0).await;
        assert_eq!(store.list_recent_incidents(1).unwrap()[0].severity, Severity::Medium);
    }
}
