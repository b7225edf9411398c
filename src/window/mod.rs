//! Sliding time windows: samples, the keyed store, and read-side aggregates.

pub mod aggregate;
pub mod store;

pub use self::store::{WindowStats, WindowStore};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single field value carried by a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Number(_) => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

/// A timestamped observation with named fields.
///
/// `timestamp` is epoch milliseconds. A sample built without one is stamped
/// with the arrival time when it enters a [`WindowStore`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: Option<i64>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Sample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(timestamp: i64) -> Self {
        Self {
            timestamp: Some(timestamp),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// Window keys the processor routes observations into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WindowKey {
    /// Log levels, for the error rate.
    LogsErrorRate,
    /// Event types, for event frequency.
    EventsFrequency,
    /// One numeric metric stream, keyed by metric name.
    Metric(String),
}

impl WindowKey {
    const LOGS: &'static str = "logs_error_rate";
    const EVENTS: &'static str = "events_frequency";
    const METRIC_PREFIX: &'static str = "metrics_";

    /// Map a stored window key back to its routing variant.
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            Self::LOGS => Some(WindowKey::LogsErrorRate),
            Self::EVENTS => Some(WindowKey::EventsFrequency),
            _ => key
                .strip_prefix(Self::METRIC_PREFIX)
                .filter(|name| !name.is_empty())
                .map(|name| WindowKey::Metric(name.to_string())),
        }
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowKey::LogsErrorRate => write!(f, "{}", Self::LOGS),
            WindowKey::EventsFrequency => write!(f, "{}", Self::EVENTS),
            WindowKey::Metric(name) => write!(f, "{}{}", Self::METRIC_PREFIX, name),
        }
    }
}
