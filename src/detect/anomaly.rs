use crate::detect::Severity;
use serde::Serialize;

/// A statistic that crossed its threshold with enough samples behind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Breach {
    pub value: f64,
    pub sample_count: usize,
    pub threshold: f64,
    pub severity: Severity,
}

/// Breach iff `value > threshold` and at least `min_samples` were seen.
///
/// The sample gate keeps sparse windows (one error out of two logs) from
/// raising incidents.
pub fn evaluate(value: f64, sample_count: usize, threshold: f64, min_samples: usize) -> Option<Breach> {
    if value > threshold && sample_count >= min_samples {
        Some(Breach {
            value,
            sample_count,
            threshold,
            severity: classify(value, threshold),
        })
    } else {
        None
    }
}

/// `High` past twice the threshold, otherwise `Medium`.
pub fn classify(value: f64, threshold: f64) -> Severity {
    if value > 2.0 * threshold {
        Severity::High
    } else {
        Severity::Medium
    }
}
