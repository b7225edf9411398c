use crate::detect::DedupOutcome;
use crate::ingest::{Observation, PayloadError, Topic};
use crate::processor::Processor;
use crate::storage::with_timeout;
use crate::window::aggregate::{self, LEVEL_FIELD};
use crate::window::{Sample, WindowKey};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

/// Categorical field carried by event samples.
const EVENT_TYPE_FIELD: &str = "type";

impl Processor {
    /// Process one observation. Never fails: malformed payloads are logged
    /// and counted as skipped.
    pub async fn handle(&mut self, obs: Observation) {
        let now = self.clock.now_ms();
        let result = match obs.topic {
            Topic::Logs => self.handle_log(&obs, now).await,
            Topic::Metrics => self.handle_metrics(&obs, now).await,
            Topic::Events => self.handle_event(&obs, now).await,
        };

        match result {
            Ok(()) => self.stats.handled += 1,
            Err(e) => {
                warn!(topic = %obs.topic, key = ?obs.key, error = %e, "Skipping malformed observation");
                self.stats.skipped += 1;
            }
        }
    }

    async fn handle_log(&mut self, obs: &Observation, now: i64) -> Result<(), PayloadError> {
        let payload = object(obs)?;
        let mut sample = Sample {
            timestamp: obs.timestamp,
            ..Sample::default()
        };
        if let Some(level) = payload.get(LEVEL_FIELD).and_then(Value::as_str) {
            sample = sample.with_field(LEVEL_FIELD, level);
        }

        self.store_raw(obs, now).await;

        let key = WindowKey::LogsErrorRate.to_string();
        self.windows.add_sample(&key, sample, now);
        let samples = self.windows.read(&key, now);
        let error_rate = aggregate::error_rate_of(&samples);
        let count = samples.len();

        debug!(error_rate = format!("{error_rate:.3}"), count, "Processed log message");

        if let Some(DedupOutcome::Created(_)) = self.monitor.observe(error_rate, count, now).await {
            self.stats.incidents_created += 1;
        }
        Ok(())
    }

    /// Every numeric field becomes a sample in its own `metrics_<name>` window.
    async fn handle_metrics(&mut self, obs: &Observation, now: i64) -> Result<(), PayloadError> {
        let payload = object(obs)?;
        let numeric: Vec<(String, f64)> = payload
            .iter()
            .filter_map(|(name, v)| v.as_f64().map(|n| (name.clone(), n)))
            .collect();

        self.store_raw(obs, now).await;

        for (name, value) in &numeric {
            let sample = Sample {
                timestamp: obs.timestamp,
                ..Sample::default()
            }
            .with_field(name.as_str(), *value);
            self.windows
                .add_sample(&WindowKey::Metric(name.clone()).to_string(), sample, now);
        }

        debug!(metrics = numeric.len(), "Processed metrics message");
        Ok(())
    }

    async fn handle_event(&mut self, obs: &Observation, now: i64) -> Result<(), PayloadError> {
        let payload = object(obs)?;
        let mut sample = Sample {
            timestamp: obs.timestamp,
            ..Sample::default()
        };
        if let Some(kind) = payload.get(EVENT_TYPE_FIELD).and_then(Value::as_str) {
            sample = sample.with_field(EVENT_TYPE_FIELD, kind);
        }

        self.store_raw(obs, now).await;
        self.windows
            .add_sample(&WindowKey::EventsFrequency.to_string(), sample, now);

        debug!(event_type = ?payload.get(EVENT_TYPE_FIELD), "Processed event message");
        Ok(())
    }

    /// Best-effort raw persistence: failures are logged, never retried.
    async fn store_raw(&self, obs: &Observation, now: i64) {
        let ts = obs.timestamp.unwrap_or(now);
        let call = self.store.store_raw_event(obs.topic.as_str(), &obs.value, ts);
        if let Err(e) = with_timeout(self.op_timeout, call).await {
            error!(topic = %obs.topic, error = %e, "Failed to store raw event");
        }
    }
}

fn object(obs: &Observation) -> Result<&Map<String, Value>, PayloadError> {
    obs.value
        .as_object()
        .ok_or(PayloadError::NotAnObject { topic: obs.topic })
}
