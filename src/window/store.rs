use crate::window::Sample;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Retained samples for one key, oldest arrival first.
#[derive(Debug)]
struct Window {
    samples: VecDeque<Sample>,
    window_size_ms: i64,
    last_eviction: i64,
}

impl Window {
    fn new(window_size_ms: i64, now: i64) -> Self {
        Self {
            samples: VecDeque::new(),
            window_size_ms,
            last_eviction: now,
        }
    }

    /// Drop every sample at or before `now - window_size_ms`.
    ///
    /// Arrival order is not timestamp order, so this scans the whole buffer.
    fn evict(&mut self, now: i64) -> usize {
        let cutoff = now.saturating_sub(self.window_size_ms);
        let before = self.samples.len();
        self.samples
            .retain(|s| s.timestamp.map_or(true, |ts| ts > cutoff));
        before - self.samples.len()
    }
}

/// Summary of a window's current contents, used as snapshot metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStats {
    pub window_key: String,
    pub count: usize,
    pub window_size_ms: i64,
    /// Equal to `generated_at` when the window is empty.
    pub oldest_timestamp: i64,
    pub newest_timestamp: i64,
    pub generated_at: i64,
}

impl WindowStats {
    pub fn from_samples(key: &str, samples: &[Sample], window_size_ms: i64, now: i64) -> Self {
        let timestamps = samples.iter().filter_map(|s| s.timestamp);
        WindowStats {
            window_key: key.to_string(),
            count: samples.len(),
            window_size_ms,
            oldest_timestamp: timestamps.clone().min().unwrap_or(now),
            newest_timestamp: timestamps.max().unwrap_or(now),
            generated_at: now,
        }
    }
}

/// Keyed in-memory holder of sliding windows.
///
/// Owned by a single event loop: every method takes `&mut self` and runs to
/// completion, so a window is never observed half-updated. Windows are
/// created on first write and only disappear through [`WindowStore::reap_idle`].
#[derive(Debug)]
pub struct WindowStore {
    window_size_ms: i64,
    windows: HashMap<String, Window>,
}

impl WindowStore {
    pub fn new(window_size_ms: i64) -> Self {
        Self {
            window_size_ms,
            windows: HashMap::new(),
        }
    }

    pub fn window_size_ms(&self) -> i64 {
        self.window_size_ms
    }

    /// Append a sample to `key`, creating the window if needed.
    ///
    /// Eviction is amortized: it only runs once more than a quarter of the
    /// window size has elapsed since the last write-triggered pass.
    pub fn add_sample(&mut self, key: &str, mut sample: Sample, now: i64) {
        let window_size_ms = self.window_size_ms;
        let window = self.windows.entry(key.to_string()).or_insert_with(|| {
            debug!(window_key = %key, "Creating window");
            Window::new(window_size_ms, now)
        });

        sample.timestamp.get_or_insert(now);
        window.samples.push_back(sample);

        if now.saturating_sub(window.last_eviction) > window.window_size_ms / 4 {
            let evicted = window.evict(now);
            window.last_eviction = now;
            if evicted > 0 {
                debug!(window_key = %key, evicted, "Evicted expired samples");
            }
        }
    }

    /// Remove every sample in `key` with `timestamp <= now - window_size`.
    /// Returns the number of samples dropped.
    pub fn evict(&mut self, key: &str, now: i64) -> usize {
        self.windows.get_mut(key).map_or(0, |w| w.evict(now))
    }

    /// Evict, then return a copy of what remains. An absent key reads as empty.
    pub fn read(&mut self, key: &str, now: i64) -> Vec<Sample> {
        match self.windows.get_mut(key) {
            Some(window) => {
                window.evict(now);
                window.samples.iter().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn stats(&mut self, key: &str, now: i64) -> WindowStats {
        let samples = self.read(key, now);
        WindowStats::from_samples(key, &samples, self.window_size_ms, now)
    }

    /// Drop windows whose last write-triggered eviction is more than
    /// `max_idle_ms` old. Returns the removed keys.
    pub fn reap_idle(&mut self, max_idle_ms: i64, now: i64) -> Vec<String> {
        let idle: Vec<String> = self
            .windows
            .iter()
            .filter(|(_, w)| now.saturating_sub(w.last_eviction) > max_idle_ms)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &idle {
            self.windows.remove(key);
            debug!(window_key = %key, "Reaped idle window");
        }
        idle
    }

    /// Active window keys, sorted for stable flush order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.windows.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.windows.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
