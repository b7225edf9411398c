//! Threshold detection and deduplicated incident creation.

pub mod anomaly;
pub mod incident;
pub mod monitor;

pub use self::anomaly::{evaluate, Breach};
pub use self::incident::{DedupOutcome, IncidentDeduplicator};
pub use self::monitor::ErrorRateMonitor;

use serde::{Deserialize, Serialize};

/// Status the core assigns to every incident it creates.
pub const STATUS_OPEN: &str = "open";
/// Incidents in this status no longer suppress new ones.
pub const STATUS_RESOLVED: &str = "resolved";

/// Severity levels for detected incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    /// Parse a stored severity; anything unrecognised reads as `Low`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// An incident about to be written.
#[derive(Debug, Clone, Serialize)]
pub struct NewIncident {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub source: String,
    pub status: String,
    pub metadata: serde_json::Value,
    /// Epoch milliseconds.
    pub created_at: i64,
}

/// A persisted incident.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: uuid::Uuid,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub source: String,
    pub status: String,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
