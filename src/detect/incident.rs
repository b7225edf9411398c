use crate::detect::NewIncident;
use crate::storage::{with_timeout, Store};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Result of a create-unless-recent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    Created(Uuid),
    /// An open incident with the same source and title is inside the cooldown.
    Suppressed { existing: Uuid },
    /// The write failed; already logged.
    Failed,
}

/// Cooldown-gated incident creation.
///
/// The lookup and the insert are two separate calls, so two evaluators racing
/// on the same `(source, title)` can both create. One evaluator per database
/// is assumed.
pub struct IncidentDeduplicator {
    store: Arc<dyn Store>,
    cooldown_hours: u32,
    op_timeout: Duration,
}

impl IncidentDeduplicator {
    pub fn new(store: Arc<dyn Store>, cooldown_hours: u32, op_timeout: Duration) -> Self {
        Self {
            store,
            cooldown_hours,
            op_timeout,
        }
    }

    pub async fn create_unless_recent(&self, incident: NewIncident) -> DedupOutcome {
        let lookup = with_timeout(
            self.op_timeout,
            self.store.find_recent_incident(
                &incident.source,
                &incident.title,
                self.cooldown_hours,
                incident.created_at,
            ),
        )
        .await;

        match lookup {
            Ok(Some(existing)) => {
                debug!(
                    source = %incident.source,
                    title = %incident.title,
                    existing = %existing.id,
                    "Suppressing duplicate incident"
                );
                return DedupOutcome::Suppressed {
                    existing: existing.id,
                };
            }
            Ok(None) => {}
            // Fail open: a duplicate is better than a silently dropped incident.
            Err(e) => {
                warn!(source = %incident.source, title = %incident.title, error = %e, "Incident lookup failed, creating anyway");
            }
        }

        match with_timeout(self.op_timeout, self.store.create_incident(&incident)).await {
            Ok(id) => DedupOutcome::Created(id),
            Err(e) => {
                error!(source = %incident.source, title = %incident.title, error = %e, "Failed to create incident");
                DedupOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Incident, Severity, STATUS_OPEN};
    use crate::storage::{open_memory_pool, AggregationSnapshot, SqliteStore, StorageError};
    use serde_json::json;

    const HOUR: i64 = 3_600_000;

    fn incident(created_at: i64) -> NewIncident {
        NewIncident {
            title: "High Error Rate Detected".into(),
            description: "Error rate of 100.0%".into(),
            severity: Severity::High,
            source: "error_rate_monitor".into(),
            status: STATUS_OPEN.into(),
            metadata: json!({}),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_then_expires() {
        let store = SqliteStore::new(open_memory_pool().unwrap());
        let dedup = IncidentDeduplicator::new(Arc::new(store.clone()), 1, Duration::from_secs(5));

        let first = dedup.create_unless_recent(incident(0)).await;
        let DedupOutcome::Created(first_id) = first else {
            panic!("expected creation, got {first:?}");
        };
        assert_eq!(
            dedup.create_unless_recent(incident(HOUR / 2)).await,
            DedupOutcome::Suppressed { existing: first_id }
        );

        let third = dedup.create_unless_recent(incident(HOUR + 1)).await;
        assert!(matches!(third, DedupOutcome::Created(id) if id != first_id));
        assert_eq!(store.list_recent_incidents(10).unwrap().len(), 2);
    }

    /// Lookups always fail; creates are counted.
    struct BrokenLookup {
        created: std::sync::Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl Store for BrokenLookup {
        async fn store_raw_event(&self, _: &str, _: &serde_json::Value, _: i64) -> Result<i64, StorageError> {
            Ok(0)
        }
        async fn store_aggregation_snapshot(&self, _: &AggregationSnapshot) -> Result<i64, StorageError> {
            Ok(0)
        }
        async fn create_incident(&self, _: &NewIncident) -> Result<Uuid, StorageError> {
            *self.created.lock().unwrap() += 1;
            Ok(Uuid::new_v4())
        }
        async fn find_recent_incident(&self, _: &str, _: &str, _: u32, _: i64) -> Result<Option<Incident>, StorageError> {
            Err(StorageError::Timeout(Duration::from_millis(1)))
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_fails_open() {
        let store = Arc::new(BrokenLookup {
            created: std::sync::Mutex::new(0),
        });
        let dedup = IncidentDeduplicator::new(store.clone(), 1, Duration::from_secs(5));
        assert!(matches!(dedup.create_unless_recent(incident(0)).await, DedupOutcome::Created(_)));
        assert!(matches!(dedup.create_unless_recent(incident(1)).await, DedupOutcome::Created(_)));
        assert_eq!(*store.created.lock().unwrap(), 2);
    }
}
