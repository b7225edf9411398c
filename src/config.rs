//! Processor configuration.
//!
//! Layered: compiled-in defaults, then an optional TOML file, then
//! environment variables. An environment variable that is set but does not
//! parse is a startup error.

use crate::connector::Backoff;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Env var naming a TOML config file.
pub const CONFIG_ENV: &str = "RTMH_CONFIG";

/// Longest accepted window: 30 days.
pub const MAX_WINDOW_SIZE_MS: i64 = 30 * 24 * 3_600_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window_size_ms: i64,
    pub error_rate_threshold: f64,
    pub min_samples: usize,
    pub flush_interval_ms: u64,
    pub idle_reap_interval_ms: u64,
    pub incident_cooldown_hours: u32,
    /// Idle time before a window is reaped. Defaults to twice the window size.
    pub max_idle_ms: Option<i64>,
    pub database_path: String,
    /// Upper bound on any single storage call.
    pub op_timeout_ms: u64,
    /// Time allowed for the final flush on shutdown.
    pub shutdown_grace_ms: u64,
    /// Depth of the queue between the input reader and the processor.
    pub channel_capacity: usize,
    pub connect: Backoff,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size_ms: 60_000,
            error_rate_threshold: 0.05,
            min_samples: 10,
            flush_interval_ms: 30_000,
            idle_reap_interval_ms: 300_000,
            incident_cooldown_hours: 1,
            max_idle_ms: None,
            database_path: "data/rtmh.db".to_string(),
            op_timeout_ms: 5_000,
            shutdown_grace_ms: 5_000,
            channel_capacity: 1_024,
            connect: Backoff::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Full layering: `file` (or `$RTMH_CONFIG`), then the environment.
    pub fn resolve(file: Option<&Path>) -> Result<Self> {
        let env_file = std::env::var(CONFIG_ENV).ok();
        let mut config = match file.or(env_file.as_deref().map(Path::new)) {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay variables returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        override_from(&lookup, "WINDOW_SIZE_MS", &mut self.window_size_ms)?;
        override_from(&lookup, "ERROR_RATE_THRESHOLD", &mut self.error_rate_threshold)?;
        override_from(&lookup, "MIN_SAMPLES", &mut self.min_samples)?;
        override_from(&lookup, "FLUSH_INTERVAL_MS", &mut self.flush_interval_ms)?;
        override_from(&lookup, "IDLE_REAP_INTERVAL_MS", &mut self.idle_reap_interval_ms)?;
        override_from(&lookup, "INCIDENT_COOLDOWN_HOURS", &mut self.incident_cooldown_hours)?;
        override_from(&lookup, "DATABASE_PATH", &mut self.database_path)?;
        override_from(&lookup, "OP_TIMEOUT_MS", &mut self.op_timeout_ms)?;
        override_from(&lookup, "SHUTDOWN_GRACE_MS", &mut self.shutdown_grace_ms)?;
        override_from(&lookup, "CHANNEL_CAPACITY", &mut self.channel_capacity)?;
        override_from(&lookup, "CONNECT_MAX_ATTEMPTS", &mut self.connect.max_attempts)?;

        if let Some(max_idle) = lookup("MAX_IDLE_MS") {
            self.max_idle_ms = Some(parse_var("MAX_IDLE_MS", &max_idle)?);
        }
        if let Some(base) = lookup("CONNECT_BASE_DELAY_MS") {
            self.connect.base_delay = Duration::from_millis(parse_var("CONNECT_BASE_DELAY_MS", &base)?);
        }
        if let Some(max) = lookup("CONNECT_MAX_DELAY_MS") {
            self.connect.max_delay = Duration::from_millis(parse_var("CONNECT_MAX_DELAY_MS", &max)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size_ms <= 0 || self.window_size_ms > MAX_WINDOW_SIZE_MS {
            bail!(
                "window_size_ms must be in 1..={MAX_WINDOW_SIZE_MS}, got {}",
                self.window_size_ms
            );
        }
        if self.flush_interval_ms == 0 || self.idle_reap_interval_ms == 0 {
            bail!("flush and reap intervals must be non-zero");
        }
        if self.op_timeout_ms == 0 {
            bail!("op_timeout_ms must be non-zero");
        }
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be non-zero");
        }
        if self.connect.max_attempts == 0 {
            bail!("connect.max_attempts must be at least 1");
        }
        if !self.error_rate_threshold.is_finite() || self.error_rate_threshold < 0.0 {
            bail!("error_rate_threshold must be a non-negative number");
        }
        Ok(())
    }

    pub fn max_idle_ms(&self) -> i64 {
        self.max_idle_ms
            .unwrap_or(self.window_size_ms.saturating_mul(2))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.idle_reap_interval_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow!("invalid value for {name} ({raw:?}): {e}"))
}

fn override_from<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_var(name, &raw)?;
    }
    Ok(())
}
