//! Read-side statistics over a window's current contents.
//!
//! Both `error_rate` and `average` return `0.0` when there is nothing to
//! measure, so "no data" and a genuine zero look the same to callers. The
//! `*_of` variants work on an already-read slice; the store variants force
//! an eviction pass first.

use crate::window::{Sample, WindowStore};

/// Field holding a log level.
pub const LEVEL_FIELD: &str = "level";

/// Whether a `level` value counts as an error.
pub fn is_error_level(level: &str) -> bool {
    level.eq_ignore_ascii_case("error")
}

pub fn count(store: &mut WindowStore, key: &str, now: i64) -> usize {
    store.read(key, now).len()
}

pub fn error_rate(store: &mut WindowStore, key: &str, now: i64) -> f64 {
    error_rate_of(&store.read(key, now))
}

pub fn average(store: &mut WindowStore, key: &str, field: &str, now: i64) -> f64 {
    average_of(&store.read(key, now), field)
}

/// Fraction of samples with an error-class `level`; `0.0` for an empty slice.
pub fn error_rate_of(samples: &[Sample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let errors = samples
        .iter()
        .filter(|s| {
            s.field(LEVEL_FIELD)
                .and_then(|v| v.as_str())
                .is_some_and(is_error_level)
        })
        .count();
    errors as f64 / samples.len() as f64
}

/// Mean of `field` over samples that carry a number for it; `0.0` if none do.
pub fn average_of(samples: &[Sample], field: &str) -> f64 {
    let values: Vec<f64> = samples
        .iter()
        .filter_map(|s| s.field(field).and_then(|v| v.as_f64()))
        .collect();
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
