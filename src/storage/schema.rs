//! Database schema and migrations.

use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS raw_events (
            id INTEGER PRIMARY KEY,
            topic TEXT NOT NULL,
            data_json TEXT NOT NULL,
            event_ts INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS metrics_agg (
            id INTEGER PRIMARY KEY,
            window_key TEXT NOT NULL,
            metric_type TEXT NOT NULL,
            value REAL NOT NULL,
            count INTEGER NOT NULL,
            window_start INTEGER NOT NULL,
            window_end INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (window_key, metric_type, window_start)
        );

        CREATE TABLE IF NOT EXISTS incidents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            severity TEXT NOT NULL,
            source TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_raw_events_topic ON raw_events(topic, event_ts);
        CREATE INDEX IF NOT EXISTS idx_metrics_agg_key ON metrics_agg(window_key, window_end);
        CREATE INDEX IF NOT EXISTS idx_incidents_dedup ON incidents(source, title, created_at);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )
}
