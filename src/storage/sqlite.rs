use crate::detect::{Incident, NewIncident, Severity, STATUS_RESOLVED};
use crate::storage::{AggregationSnapshot, Pool, StorageError, Store};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

const MS_PER_HOUR: i64 = 3_600_000;

/// [`Store`] backed by the r2d2 SQLite pool. Every call runs on the blocking
/// thread pool so the event loop is never stalled by disk I/O.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Pool) -> Result<T, StorageError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || f(&pool)).await?
    }

    pub fn list_recent_incidents(&self, limit: usize) -> Result<Vec<Incident>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, description, severity, source, status, metadata_json, created_at
             FROM incidents ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], incident_from_row)?;

        let mut incidents = Vec::new();
        for r in rows {
            incidents.push(r?);
        }
        Ok(incidents)
    }

    /// Most recently updated snapshots, optionally for one window key.
    pub fn list_snapshots(
        &self,
        window_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AggregationSnapshot>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT window_key, metric_type, value, count, window_start, window_end, metadata_json
             FROM metrics_agg
             WHERE ?1 IS NULL OR window_key = ?1
             ORDER BY window_end DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![window_key, limit as i64], |row| {
            Ok(AggregationSnapshot {
                window_key: row.get(0)?,
                metric_type: row.get(1)?,
                value: row.get(2)?,
                count: row.get(3)?,
                window_start: row.get(4)?,
                window_end: row.get(5)?,
                metadata: json_column(row, 6)?,
            })
        })?;

        let mut snapshots = Vec::new();
        for r in rows {
            snapshots.push(r?);
        }
        Ok(snapshots)
    }
}

fn incident_from_row(row: &Row<'_>) -> rusqlite::Result<Incident> {
    let id_str: String = row.get(0)?;
    let severity: String = row.get(3)?;
    let created_ms: i64 = row.get(7)?;

    Ok(Incident {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
        title: row.get(1)?,
        description: row.get(2)?,
        severity: Severity::from_db(&severity),
        source: row.get(4)?,
        status: row.get(5)?,
        metadata: json_column(row, 6)?,
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(7, created_ms))?,
    })
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn store_raw_event(
        &self,
        topic: &str,
        payload: &serde_json::Value,
        timestamp: i64,
    ) -> Result<i64, StorageError> {
        let topic = topic.to_string();
        let data = serde_json::to_string(payload)?;
        self.blocking(move |pool| {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO raw_events (topic, data_json, event_ts) VALUES (?1, ?2, ?3)",
                params![topic, data, timestamp],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn store_aggregation_snapshot(
        &self,
        snapshot: &AggregationSnapshot,
    ) -> Result<i64, StorageError> {
        let s = snapshot.clone();
        let metadata = serde_json::to_string(&s.metadata)?;
        self.blocking(move |pool| {
            let conn = pool.get()?;
            let id = conn.query_row(
                "INSERT INTO metrics_agg
                    (window_key, metric_type, value, count, window_start, window_end, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (window_key, metric_type, window_start) DO UPDATE SET
                    value = excluded.value,
                    count = excluded.count,
                    window_end = excluded.window_end,
                    metadata_json = excluded.metadata_json,
                    updated_at = datetime('now')
                 RETURNING id",
                params![
                    s.window_key,
                    s.metric_type,
                    s.value,
                    s.count,
                    s.window_start,
                    s.window_end,
                    metadata
                ],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
    }

    async fn create_incident(&self, incident: &NewIncident) -> Result<Uuid, StorageError> {
        let i = incident.clone();
        let metadata = serde_json::to_string(&i.metadata)?;
        self.blocking(move |pool| {
            let conn = pool.get()?;
            let id = Uuid::new_v4();
            conn.execute(
                "INSERT INTO incidents
                    (id, title, description, severity, source, status, metadata_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id.to_string(),
                    i.title,
                    i.description,
                    i.severity.as_str(),
                    i.source,
                    i.status,
                    metadata,
                    i.created_at
                ],
            )?;
            Ok(id)
        })
        .await
    }

    async fn find_recent_incident(
        &self,
        source: &str,
        title: &str,
        hours_back: u32,
        now: i64,
    ) -> Result<Option<Incident>, StorageError> {
        let source = source.to_string();
        let title = title.to_string();
        let since = now - i64::from(hours_back) * MS_PER_HOUR;
        self.blocking(move |pool| {
            let conn = pool.get()?;
            let found = conn
                .query_row(
                    "SELECT id, title, description, severity, source, status, metadata_json, created_at
                     FROM incidents
                     WHERE source = ?1 AND title = ?2 AND status != ?3 AND created_at > ?4
                     ORDER BY created_at DESC
                     LIMIT 1",
                    params![source, title, STATUS_RESOLVED, since],
                    incident_from_row,
                )
                .optional()?;
            Ok(found)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::STATUS_OPEN;
    use crate::storage::open_memory_pool;
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::new(open_memory_pool().unwrap())
    }

    fn snapshot(value: f64, count: i64) -> AggregationSnapshot {
        AggregationSnapshot {
            window_key: "logs_error_rate".into(),
            metric_type: "error_rate".into(),
            value,
            count,
            window_start: 1_000,
            window_end: 61_000,
            metadata: json!({ "pass": count }),
        }
    }

    fn incident(title: &str, created_at: i64) -> NewIncident {
        NewIncident {
            title: title.into(),
            description: "d".into(),
            severity: Severity::High,
            source: "error_rate_monitor".into(),
            status: STATUS_OPEN.into(),
            metadata: json!({}),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_snapshot_upsert_keeps_one_row_with_latest_value() {
        let store = store();
        let first = store.store_aggregation_snapshot(&snapshot(0.2, 5)).await.unwrap();
        let second = store.store_aggregation_snapshot(&snapshot(0.7, 9)).await.unwrap();
        assert_eq!(first, second);

        let rows = store.list_snapshots(Some("logs_error_rate"), 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 0.7);
        assert_eq!(rows[0].count, 9);
        assert_eq!(rows[0].metadata, json!({ "pass": 9 }));
    }

    #[tokio::test]
    async fn test_distinct_window_start_is_a_new_row() {
        let store = store();
        store.store_aggregation_snapshot(&snapshot(0.2, 5)).await.unwrap();
        let mut later = snapshot(0.3, 6);
        later.window_start += 30_000;
        store.store_aggregation_snapshot(&later).await.unwrap();
        assert_eq!(store.list_snapshots(None, 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_raw_event_ids_increase() {
        let store = store();
        let a = store.store_raw_event("logs", &json!({"level": "info"}), 1).await.unwrap();
        let b = store.store_raw_event("logs", &json!({"level": "error"}), 2).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_find_recent_respects_window_and_status() {
        let store = store();
        let hour = MS_PER_HOUR;
        let id = store.create_incident(&incident("High Error Rate Detected", 0)).await.unwrap();

        let found = store
            .find_recent_incident("error_rate_monitor", "High Error Rate Detected", 1, hour - 1)
            .await
            .unwrap()
            .expect("inside cooldown");
        assert_eq!(found.id, id);
        assert_eq!(found.severity, Severity::High);

        let expired = store
            .find_recent_incident("error_rate_monitor", "High Error Rate Detected", 1, hour)
            .await
            .unwrap();
        assert!(expired.is_none());

        let other_title = store
            .find_recent_incident("error_rate_monitor", "Something Else", 1, 10)
            .await
            .unwrap();
        assert!(other_title.is_none());

        store
            .pool()
            .get()
            .unwrap()
            .execute("UPDATE incidents SET status = 'resolved'", [])
            .unwrap();
        let resolved = store
            .find_recent_incident("error_rate_monitor", "High Error Rate Detected", 1, 10)
            .await
            .unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_rows_surface_as_errors() {
        let store = store();
        store.create_incident(&incident("a", 1)).await.unwrap();
        store.store_aggregation_snapshot(&snapshot(0.2, 5)).await.unwrap();

        let conn = store.pool().get().unwrap();
        conn.execute("UPDATE incidents SET id = 'not-a-uuid'", []).unwrap();
        conn.execute("UPDATE metrics_agg SET metadata_json = '{broken'", []).unwrap();
        drop(conn);

        assert!(matches!(
            store.list_recent_incidents(10),
            Err(StorageError::Sqlite(rusqlite::Error::FromSqlConversionFailure(0, _, _)))
        ));
        assert!(matches!(
            store.list_snapshots(None, 10),
            Err(StorageError::Sqlite(rusqlite::Error::FromSqlConversionFailure(6, _, _)))
        ));
        assert!(store
            .find_recent_incident("error_rate_monitor", "a", 1, 2)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_list_recent_incidents_newest_first() {
        let store = store();
        store.create_incident(&incident("a", 1)).await.unwrap();
        store.create_incident(&incident("b", 2)).await.unwrap();
        let list = store.list_recent_incidents(10).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].title, "b");
        assert_eq!(list[0].status, "open");
    }
}
