//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS telemetry (
            id INTEGER PRIMARY KEY,
            service_id TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            latency_ms REAL NOT NULL,
            payload_kb REAL NOT NULL,
            created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS baselines (
            service_id TEXT PRIMARY KEY,
            sample_count INTEGER NOT NULL,
            mean_latency REAL NOT NULL,
            stddev_latency REAL NOT NULL,
            mean_payload REAL NOT NULL,
            stddev_payload REAL NOT NULL,
            p50_latency REAL NOT NULL,
            p95_latency REAL NOT NULL,
            p99_latency REAL NOT NULL,
            last_updated_ms INTEGER NOT NULL,
            created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS health_states (
            service_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            transition_timestamp_ms INTEGER NOT NULL,
            metadata_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS drift_events (
            id INTEGER PRIMARY KEY,
            service_id TEXT NOT NULL,
            detected_at_ms INTEGER NOT NULL,
            previous_state TEXT NOT NULL,
            new_state TEXT NOT NULL,
            trigger_samples_json TEXT,
            metadata_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS zscore_history (
            id INTEGER PRIMARY KEY,
            service_id TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            latency_zscore REAL NOT NULL,
            payload_zscore REAL NOT NULL,
            created_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_telemetry_service_ts ON telemetry(service_id, timestamp_ms);
        CREATE INDEX IF NOT EXISTS idx_telemetry_created ON telemetry(created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_zscore_service_created ON zscore_history(service_id, created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_drift_events_service ON drift_events(service_id, detected_at_ms);
        CREATE INDEX IF NOT EXISTS idx_drift_events_created ON drift_events(detected_at_ms);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM baselines", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM health_states", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
    }
}
