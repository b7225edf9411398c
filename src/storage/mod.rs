//! SQLite storage layer -- pool, persistence contract, schema.

pub mod schema;
pub mod sqlite;

pub use self::sqlite::SqliteStore;

use crate::connector::{self, Backoff, ConnectError};
use crate::detect::{Incident, NewIncident};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("blocking storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),
}

/// A summary statistic for one window over `[window_start, window_end]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationSnapshot {
    pub window_key: String,
    pub metric_type: String,
    pub value: f64,
    pub count: i64,
    /// Epoch milliseconds.
    pub window_start: i64,
    pub window_end: i64,
    pub metadata: serde_json::Value,
}

/// What the processor needs from persistence.
///
/// Implementations must make `store_aggregation_snapshot` an upsert on
/// `(window_key, metric_type, window_start)`.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn store_raw_event(
        &self,
        topic: &str,
        payload: &serde_json::Value,
        timestamp: i64,
    ) -> Result<i64, StorageError>;

    async fn store_aggregation_snapshot(
        &self,
        snapshot: &AggregationSnapshot,
    ) -> Result<i64, StorageError>;

    async fn create_incident(&self, incident: &NewIncident) -> Result<uuid::Uuid, StorageError>;

    /// Most recent non-resolved incident for `(source, title)` created in the
    /// `hours_back` hours before `now` (epoch ms).
    async fn find_recent_incident(
        &self,
        source: &str,
        title: &str,
        hours_back: u32,
        now: i64,
    ) -> Result<Option<Incident>, StorageError>;
}

/// Open (or create) the SQLite database and return a migrated connection pool.
pub fn open_pool(path: &str) -> Result<Pool, StorageError> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::builder()
        .connection_timeout(Duration::from_secs(2))
        .build(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// A single-connection in-memory pool. Each SQLite memory connection is its
/// own database, so the pool must never hand out a second one.
pub fn open_memory_pool() -> Result<Pool, StorageError> {
    let pool = R2D2Pool::builder()
        .max_size(1)
        .max_lifetime(None)
        .idle_timeout(None)
        .build(SqliteConnectionManager::memory())?;
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    Ok(pool)
}

/// Bound a storage call so a stalled database surfaces as an error.
///
/// A timeout abandons the result but does not cancel the blocking write
/// behind it, which may still commit afterwards.
pub async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StorageError>>,
) -> Result<T, StorageError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(StorageError::Timeout(limit)))
}

/// Open the pool at startup, retrying with backoff until the policy gives up.
pub async fn connect(path: &str, policy: Backoff) -> Result<Pool, ConnectError> {
    connector::connect_with_backoff("storage", policy, || {
        let path = path.to_string();
        async move {
            tokio::task::spawn_blocking(move || open_pool(&path))
                .await
                .map_err(StorageError::from)
                .and_then(|r| r)
        }
    })
    .await
}
