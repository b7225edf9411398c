//! Inbound observations: topics, wire parsing, and line-oriented sources.

pub mod source;

pub use self::source::{forward_lines, forward_lines_blocking, LineStats};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an observation was skipped.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),
    #[error("{topic} payload must be a JSON object")]
    NotAnObject { topic: Topic },
    #[error("invalid timestamp {0}")]
    BadTimestamp(serde_json::Value),
}

/// The closed set of streams the processor consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Logs,
    Metrics,
    Events,
}

impl Topic {
    /// Broker-side topic names carry this prefix.
    const PREFIX: &'static str = "rtmh.";

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Logs => "logs",
            Topic::Metrics => "metrics",
            Topic::Events => "events",
        }
    }
}

impl std::str::FromStr for Topic {
    type Err = PayloadError;

    /// Accepts both `logs` and `rtmh.logs`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(Self::PREFIX).unwrap_or(s) {
            "logs" => Ok(Topic::Logs),
            "metrics" => Ok(Topic::Metrics),
            "events" => Ok(Topic::Events),
            _ => Err(PayloadError::UnknownTopic(s.to_string())),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One message from the inbound stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub topic: Topic,
    pub key: Option<String>,
    pub value: serde_json::Value,
    /// Epoch milliseconds; `None` means "use arrival time".
    pub timestamp: Option<i64>,
}

impl Observation {
    pub fn new(topic: Topic, value: serde_json::Value) -> Self {
        Self {
            topic,
            key: None,
            value,
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Parse one NDJSON line:
    /// `{"topic":"rtmh.logs","key":"api","value":{...},"timestamp":1700000000000}`.
    ///
    /// `timestamp` may be a number or a numeric string.
    pub fn parse_line(line: &str) -> Result<Self, PayloadError> {
        #[derive(Deserialize)]
        struct Wire {
            topic: String,
            #[serde(default)]
            key: Option<String>,
            value: serde_json::Value,
            #[serde(default)]
            timestamp: Option<serde_json::Value>,
        }

        let wire: Wire = serde_json::from_str(line)?;
        let topic = wire.topic.parse()?;
        let timestamp = match wire.timestamp {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => Some(parse_timestamp(&v).ok_or(PayloadError::BadTimestamp(v))?),
        };

        Ok(Self {
            topic,
            key: wire.key,
            value: wire.value,
            timestamp,
        })
    }
}

fn parse_timestamp(v: &serde_json::Value) -> Option<i64> {
    match v {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_accepts_prefixed_names() {
        assert_eq!("logs".parse::<Topic>().unwrap(), Topic::Logs);
        assert_eq!("rtmh.metrics".parse::<Topic>().unwrap(), Topic::Metrics);
        assert_eq!("rtmh.events".parse::<Topic>().unwrap(), Topic::Events);
        assert!(matches!(
            "rtmh.traces".parse::<Topic>(),
            Err(PayloadError::UnknownTopic(t)) if t == "rtmh.traces"
        ));
    }

    #[test]
    fn test_parse_line_full() {
        let obs = Observation::parse_line(
            r#"{"topic":"rtmh.logs","key":"api","value":{"level":"error"},"timestamp":"1700000000123"}"#,
        )
        .unwrap();
        assert_eq!(obs.topic, Topic::Logs);
        assert_eq!(obs.key.as_deref(), Some("api"));
        assert_eq!(obs.value, json!({"level": "error"}));
        assert_eq!(obs.timestamp, Some(1_700_000_000_123));
    }

    #[test]
    fn test_parse_line_without_timestamp() {
        let obs = Observation::parse_line(r#"{"topic":"events","value":{"type":"deploy"}}"#).unwrap();
        assert_eq!(obs.timestamp, None);
        assert_eq!(obs.key, None);
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        assert!(matches!(Observation::parse_line("not json"), Err(PayloadError::Json(_))));
        assert!(matches!(
            Observation::parse_line(r#"{"topic":"logs","value":{},"timestamp":"soon"}"#),
            Err(PayloadError::BadTimestamp(_))
        ));
        assert!(matches!(
            Observation::parse_line(r#"{"topic":"logs"}"#),
            Err(PayloadError::Json(_))
        ));
    }
}
