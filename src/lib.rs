//! rtmh-processor -- streaming window aggregation and incident detection.
//!
//! Observations (logs, metrics, events) are routed into per-key sliding
//! windows; rolling statistics are evaluated against thresholds to raise
//! deduplicated incidents, and window summaries are persisted on a timer.

pub mod clock;
pub mod config;
pub mod connector;
pub mod detect;
pub mod ingest;
pub mod processor;
pub mod storage;
pub mod window;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub use crate::config::Config;
pub use crate::processor::{Processor, ProcessorStats};

/// Where observations are read from.
#[derive(Debug, Clone)]
pub enum Input {
    Stdin,
    File(PathBuf),
}

/// Start the processor: connect storage, read observations from `input`, and
/// run until the input ends or Ctrl-C.
///
/// Failing to reach storage or open the input aborts startup. After that,
/// nothing short of shutdown stops the stream.
pub async fn run(config: Config, input: Input) -> Result<ProcessorStats> {
    info!(db_path = %config.database_path, "Connecting to storage");
    if let Some(dir) = std::path::Path::new(&config.database_path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create database directory {}", dir.display()))?;
        }
    }
    let pool = storage::connect(&config.database_path, config.connect)
        .await
        .context("storage unavailable")?;
    let store = Arc::new(storage::SqliteStore::new(pool));

    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let reader = match input {
        Input::Stdin => {
            info!("Reading observations from stdin");
            // A blocking stdin read cannot be cancelled, so it gets its own
            // thread that is never joined; process exit tears it down.
            std::thread::Builder::new()
                .name("stdin-reader".into())
                .spawn(move || {
                    report_input(ingest::forward_lines_blocking(std::io::stdin().lock(), tx))
                })
                .context("failed to start stdin reader")?;
            None
        }
        Input::File(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open input {}", path.display()))?;
            info!(path = %path.display(), "Reading observations from file");
            Some(tokio::spawn(async move {
                report_input(ingest::forward_lines(BufReader::new(file), tx).await)
            }))
        }
    };

    let processor = Processor::new(&config, store, Arc::new(clock::SystemClock));
    let stats = processor.run(rx, shutdown_signal()).await;

    if let Some(reader) = reader {
        reader.abort();
        if let Err(e) = reader.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Input reader panicked");
            }
        }
    }

    Ok(stats)
}

fn report_input(result: std::io::Result<ingest::LineStats>) {
    match result {
        Ok(lines) => info!(accepted = lines.accepted, skipped = lines.skipped, "Input finished"),
        Err(e) => warn!(error = %e, "Input reader failed"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
