//! The streaming processor: one event loop that owns every window.
//!
//! Message handling, the flush timer, and the reap timer are arms of a single
//! `select!`, so each unit of work finishes before the next one starts and no
//! lock is needed around the [`WindowStore`]. Storage calls are the only
//! suspension points and each is bounded by the configured operation timeout.

mod handlers;
mod maintenance;

pub use self::maintenance::FlushReport;

use crate::clock::Clock;
use crate::config::Config;
use crate::detect::{ErrorRateMonitor, IncidentDeduplicator};
use crate::ingest::Observation;
use crate::storage::Store;
use crate::window::WindowStore;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Counters over the lifetime of a processor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub handled: u64,
    pub skipped: u64,
    pub incidents_created: u64,
    pub snapshots_written: u64,
    pub windows_reaped: u64,
}

pub struct Processor {
    windows: WindowStore,
    store: Arc<dyn Store>,
    monitor: ErrorRateMonitor,
    clock: Arc<dyn Clock>,
    op_timeout: Duration,
    max_idle_ms: i64,
    flush_interval: Duration,
    reap_interval: Duration,
    shutdown_grace: Duration,
    stats: ProcessorStats,
}

impl Processor {
    pub fn new(config: &Config, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        let dedup = IncidentDeduplicator::new(
            store.clone(),
            config.incident_cooldown_hours,
            config.op_timeout(),
        );
        let monitor = ErrorRateMonitor::new(
            dedup,
            config.error_rate_threshold,
            config.min_samples,
            config.window_size_ms,
        );

        Self {
            windows: WindowStore::new(config.window_size_ms),
            store,
            monitor,
            clock,
            op_timeout: config.op_timeout(),
            max_idle_ms: config.max_idle_ms(),
            flush_interval: config.flush_interval(),
            reap_interval: config.reap_interval(),
            shutdown_grace: config.shutdown_grace(),
            stats: ProcessorStats::default(),
        }
    }

    pub fn windows(&self) -> &WindowStore {
        &self.windows
    }

    pub fn windows_mut(&mut self) -> &mut WindowStore {
        &mut self.windows
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats
    }

    /// Consume `rx` until it closes or `shutdown` resolves, then run a final
    /// flush bounded by the shutdown grace period.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Observation>,
        shutdown: impl Future<Output = ()>,
    ) -> ProcessorStats {
        let start = Instant::now();
        let mut flush_tick = interval_at(start + self.flush_interval, self.flush_interval);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reap_tick = interval_at(start + self.reap_interval, self.reap_interval);
        reap_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        info!(
            window_size_ms = self.windows.window_size_ms(),
            flush_ms = self.flush_interval.as_millis() as u64,
            reap_ms = self.reap_interval.as_millis() as u64,
            "Processor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = flush_tick.tick() => {
                    self.flush().await;
                }
                _ = reap_tick.tick() => {
                    self.reap();
                }
                msg = rx.recv() => match msg {
                    Some(obs) => self.handle(obs).await,
                    None => {
                        info!("Input closed");
                        break;
                    }
                },
            }
        }

        // Stop accepting; anything still queued is dropped.
        rx.close();

        match tokio::time::timeout(self.shutdown_grace, self.flush()).await {
            Ok(report) => info!(written = report.written, "Final flush complete"),
            Err(_) => warn!(grace = ?self.shutdown_grace, "Final flush exceeded grace period"),
        }

        info!(stats = ?self.stats, "Processor stopped");
        self.stats
    }
}
