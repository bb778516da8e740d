//! Storage layer — a capability-set trait plus a SQLite-backed
//! implementation.
//!
//! Every path that needs persistence depends on `dyn Store`, never on
//! `SqliteStore` directly, so tests can swap in
//! [`memory::MemoryStore`] without touching a database file. Store
//! methods are synchronous: callers on the async side wrap them in
//! `tokio::task::spawn_blocking`, the same way the upstream engine
//! wraps its own rusqlite calls.

pub mod memory;
pub mod retention;
pub mod schema;

use anyhow::Result;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::models::{Baseline, DriftEvent, HealthState, HealthStateKind, TelemetrySample, TransitionReason, ZScoreRecord};

/// Connection pool type.
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Everything the detection engine needs from persistence.
///
/// Implementations must be safe to share across the ingestion worker
/// pool and the HTTP handlers behind an `Arc`.
pub trait Store: Send + Sync {
    fn insert_telemetry(&self, sample: &TelemetrySample) -> Result<()>;

    /// Most recent `limit` samples for a service, newest first.
    fn recent_telemetry(&self, service_id: &str, limit: u64) -> Result<Vec<TelemetrySample>>;

    fn telemetry_count(&self, service_id: &str) -> Result<u64>;

    fn get_baseline(&self, service_id: &str) -> Result<Option<Baseline>>;

    fn put_baseline(&self, baseline: &Baseline) -> Result<()>;

    fn get_health_state(&self, service_id: &str) -> Result<Option<HealthState>>;

    fn put_health_state(&self, state: &HealthState) -> Result<()>;

    fn insert_zscore(&self, record: &ZScoreRecord) -> Result<()>;

    /// Most recent `limit` z-score records for a service, newest first.
    fn recent_zscores(&self, service_id: &str, limit: u64) -> Result<Vec<ZScoreRecord>>;

    /// Inserts a drift event and returns its assigned id.
    fn insert_drift_event(&self, event: &DriftEvent) -> Result<i64>;

    fn recent_drift_events(&self, service_id: &str, limit: u64) -> Result<Vec<DriftEvent>>;

    /// Wipes all tracked state for a service: baseline, z-score history,
    /// and health state. Telemetry rows are left in place (they're an
    /// append-only audit trail).
    fn reset_service(&self, service_id: &str) -> Result<()>;

    fn list_tracked_services(&self) -> Result<Vec<String>>;

    fn purge_telemetry_older_than(&self, cutoff_ms: i64) -> Result<u64>;

    fn purge_drift_events_older_than(&self, cutoff_ms: i64) -> Result<u64>;

    fn purge_zscores_older_than(&self, cutoff_ms: i64) -> Result<u64>;
}

/// Open (or create) the SQLite database and return a connection pool,
/// with migrations already applied.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn row_to_telemetry(row: &rusqlite::Row) -> rusqlite::Result<TelemetrySample> {
    Ok(TelemetrySample {
        service_id: row.get(0)?,
        timestamp_ms: row.get(1)?,
        latency_ms: row.get(2)?,
        payload_kb: row.get(3)?,
        created_at_ms: row.get(4)?,
    })
}

fn row_to_zscore(row: &rusqlite::Row) -> rusqlite::Result<ZScoreRecord> {
    Ok(ZScoreRecord {
        service_id: row.get(0)?,
        timestamp_ms: row.get(1)?,
        latency_zscore: row.get(2)?,
        payload_zscore: row.get(3)?,
        created_at_ms: row.get(4)?,
    })
}

fn row_to_baseline(row: &rusqlite::Row) -> rusqlite::Result<Baseline> {
    Ok(Baseline {
        service_id: row.get(0)?,
        sample_count: row.get(1)?,
        mean_latency: row.get(2)?,
        stddev_latency: row.get(3)?,
        mean_payload: row.get(4)?,
        stddev_payload: row.get(5)?,
        p50_latency: row.get(6)?,
        p95_latency: row.get(7)?,
        p99_latency: row.get(8)?,
        last_updated_ms: row.get(9)?,
        created_at_ms: row.get(10)?,
    })
}

fn row_to_health_state(row: &rusqlite::Row) -> rusqlite::Result<HealthState> {
    let state: String = row.get(1)?;
    let metadata_json: String = row.get(3)?;
    Ok(HealthState {
        service_id: row.get(0)?,
        state: HealthStateKind::parse(&state).unwrap_or(HealthStateKind::InsufficientData),
        transition_timestamp_ms: row.get(2)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(TransitionReason::NewlyTracked),
    })
}

fn row_to_drift_event(row: &rusqlite::Row) -> rusqlite::Result<DriftEvent> {
    let previous_state: String = row.get(3)?;
    let new_state: String = row.get(4)?;
    let trigger_samples_json: Option<String> = row.get(5)?;
    let metadata_json: String = row.get(6)?;
    Ok(DriftEvent {
        id: row.get(0)?,
        service_id: row.get(1)?,
        detected_at_ms: row.get(2)?,
        previous_state: HealthStateKind::parse(&previous_state)
            .unwrap_or(HealthStateKind::InsufficientData),
        new_state: HealthStateKind::parse(&new_state).unwrap_or(HealthStateKind::InsufficientData),
        trigger_samples: trigger_samples_json.and_then(|s| serde_json::from_str(&s).ok()),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(TransitionReason::NewlyTracked),
    })
}

impl Store for SqliteStore {
    fn insert_telemetry(&self, sample: &TelemetrySample) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO telemetry (service_id, timestamp_ms, latency_ms, payload_kb, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                sample.service_id,
                sample.timestamp_ms,
                sample.latency_ms,
                sample.payload_kb,
                sample.created_at_ms
            ],
        )?;
        Ok(())
    }

    fn recent_telemetry(&self, service_id: &str, limit: u64) -> Result<Vec<TelemetrySample>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT service_id, timestamp_ms, latency_ms, payload_kb, created_at_ms
             FROM telemetry WHERE service_id = ?1
             ORDER BY timestamp_ms DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![service_id, limit as i64], row_to_telemetry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn telemetry_count(&self, service_id: &str) -> Result<u64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM telemetry WHERE service_id = ?1",
            params![service_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn get_baseline(&self, service_id: &str) -> Result<Option<Baseline>> {
        let conn = self.pool.get()?;
        let baseline = conn
            .query_row(
                "SELECT service_id, sample_count, mean_latency, stddev_latency, mean_payload,
                        stddev_payload, p50_latency, p95_latency, p99_latency, last_updated_ms,
                        created_at_ms
                 FROM baselines WHERE service_id = ?1",
                params![service_id],
                row_to_baseline,
            )
            .optional()?;
        Ok(baseline)
    }

    fn put_baseline(&self, baseline: &Baseline) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO baselines (service_id, sample_count, mean_latency, stddev_latency,
                mean_payload, stddev_payload, p50_latency, p95_latency, p99_latency,
                last_updated_ms, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(service_id) DO UPDATE SET
                sample_count = excluded.sample_count,
                mean_latency = excluded.mean_latency,
                stddev_latency = excluded.stddev_latency,
                mean_payload = excluded.mean_payload,
                stddev_payload = excluded.stddev_payload,
                p50_latency = excluded.p50_latency,
                p95_latency = excluded.p95_latency,
                p99_latency = excluded.p99_latency,
                last_updated_ms = excluded.last_updated_ms",
            params![
                baseline.service_id,
                baseline.sample_count,
                baseline.mean_latency,
                baseline.stddev_latency,
                baseline.mean_payload,
                baseline.stddev_payload,
                baseline.p50_latency,
                baseline.p95_latency,
                baseline.p99_latency,
                baseline.last_updated_ms,
                baseline.created_at_ms,
            ],
        )?;
        Ok(())
    }

    fn get_health_state(&self, service_id: &str) -> Result<Option<HealthState>> {
        let conn = self.pool.get()?;
        let state = conn
            .query_row(
                "SELECT service_id, state, transition_timestamp_ms, metadata_json
                 FROM health_states WHERE service_id = ?1",
                params![service_id],
                row_to_health_state,
            )
            .optional()?;
        Ok(state)
    }

    fn put_health_state(&self, state: &HealthState) -> Result<()> {
        let conn = self.pool.get()?;
        let metadata_json = serde_json::to_string(&state.metadata)?;
        conn.execute(
            "INSERT INTO health_states (service_id, state, transition_timestamp_ms, metadata_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(service_id) DO UPDATE SET
                state = excluded.state,
                transition_timestamp_ms = excluded.transition_timestamp_ms,
                metadata_json = excluded.metadata_json",
            params![
                state.service_id,
                state.state.as_str(),
                state.transition_timestamp_ms,
                metadata_json
            ],
        )?;
        Ok(())
    }

    fn insert_zscore(&self, record: &ZScoreRecord) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO zscore_history (service_id, timestamp_ms, latency_zscore, payload_zscore, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.service_id,
                record.timestamp_ms,
                record.latency_zscore,
                record.payload_zscore,
                record.created_at_ms
            ],
        )?;
        Ok(())
    }

    fn recent_zscores(&self, service_id: &str, limit: u64) -> Result<Vec<ZScoreRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT service_id, timestamp_ms, latency_zscore, payload_zscore, created_at_ms
             FROM zscore_history WHERE service_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![service_id, limit as i64], row_to_zscore)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn insert_drift_event(&self, event: &DriftEvent) -> Result<i64> {
        let conn = self.pool.get()?;
        let trigger_samples_json = event
            .trigger_samples
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata_json = serde_json::to_string(&event.metadata)?;
        conn.execute(
            "INSERT INTO drift_events (service_id, detected_at_ms, previous_state, new_state,
                trigger_samples_json, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.service_id,
                event.detected_at_ms,
                event.previous_state.as_str(),
                event.new_state.as_str(),
                trigger_samples_json,
                metadata_json
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent_drift_events(&self, service_id: &str, limit: u64) -> Result<Vec<DriftEvent>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, service_id, detected_at_ms, previous_state, new_state,
                    trigger_samples_json, metadata_json
             FROM drift_events WHERE service_id = ?1
             ORDER BY detected_at_ms DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![service_id, limit as i64], row_to_drift_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn reset_service(&self, service_id: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM baselines WHERE service_id = ?1", params![service_id])?;
        conn.execute(
            "DELETE FROM zscore_history WHERE service_id = ?1",
            params![service_id],
        )?;
        conn.execute(
            "DELETE FROM health_states WHERE service_id = ?1",
            params![service_id],
        )?;
        Ok(())
    }

    fn list_tracked_services(&self) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT service_id FROM health_states ORDER BY service_id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn purge_telemetry_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let conn = self.pool.get()?;
        let affected = conn.execute(
            "DELETE FROM telemetry WHERE created_at_ms < ?1",
            params![cutoff_ms],
        )?;
        Ok(affected as u64)
    }

    fn purge_drift_events_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let conn = self.pool.get()?;
        let affected = conn.execute(
            "DELETE FROM drift_events WHERE detected_at_ms < ?1",
            params![cutoff_ms],
        )?;
        Ok(affected as u64)
    }

    fn purge_zscores_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let conn = self.pool.get()?;
        let affected = conn.execute(
            "DELETE FROM zscore_history WHERE created_at_ms < ?1",
            params![cutoff_ms],
        )?;
        Ok(affected as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealthStateKind;

    fn open_test_store() -> SqliteStore {
        let manager = SqliteConnectionManager::memory();
        let pool = R2D2Pool::builder().max_size(1).build(manager).unwrap();
        schema::migrate(&pool.get().unwrap()).unwrap();
        SqliteStore::new(pool)
    }

    #[test]
    fn round_trips_telemetry() {
        let store = open_test_store();
        let sample = TelemetrySample {
            service_id: "checkout".into(),
            timestamp_ms: 1000,
            latency_ms: 120.0,
            payload_kb: 4.2,
            created_at_ms: 1000,
        };
        store.insert_telemetry(&sample).unwrap();
        let recent = store.recent_telemetry("checkout", 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].latency_ms, 120.0);
        assert_eq!(store.telemetry_count("checkout").unwrap(), 1);
    }

    #[test]
    fn upserts_baseline() {
        let store = open_test_store();
        let baseline = Baseline {
            service_id: "checkout".into(),
            sample_count: 100,
            mean_latency: 150.0,
            stddev_latency: 25.0,
            mean_payload: 4.0,
            stddev_payload: 0.5,
            p50_latency: 148.0,
            p95_latency: 190.0,
            p99_latency: 210.0,
            last_updated_ms: 1000,
            created_at_ms: 1000,
        };
        store.put_baseline(&baseline).unwrap();
        let mut updated = baseline.clone();
        updated.sample_count = 200;
        store.put_baseline(&updated).unwrap();

        let fetched = store.get_baseline("checkout").unwrap().unwrap();
        assert_eq!(fetched.sample_count, 200);
    }

    #[test]
    fn reset_service_clears_baseline_and_health_but_not_telemetry() {
        let store = open_test_store();
        let sample = TelemetrySample {
            service_id: "checkout".into(),
            timestamp_ms: 1000,
            latency_ms: 120.0,
            payload_kb: 4.2,
            created_at_ms: 1000,
        };
        store.insert_telemetry(&sample).unwrap();
        store
            .put_health_state(&HealthState {
                service_id: "checkout".into(),
                state: HealthStateKind::Stable,
                transition_timestamp_ms: 1000,
                metadata: TransitionReason::NewlyTracked,
            })
            .unwrap();

        store.reset_service("checkout").unwrap();

        assert!(store.get_health_state("checkout").unwrap().is_none());
        assert_eq!(store.telemetry_count("checkout").unwrap(), 1);
    }

    #[test]
    fn purges_telemetry_older_than_cutoff() {
        let store = open_test_store();
        for (i, ts) in [100_i64, 200, 9_000].into_iter().enumerate() {
            store
                .insert_telemetry(&TelemetrySample {
                    service_id: "checkout".into(),
                    timestamp_ms: ts,
                    latency_ms: i as f64,
                    payload_kb: 1.0,
                    created_at_ms: ts,
                })
                .unwrap();
        }
        let purged = store.purge_telemetry_older_than(1000).unwrap();
        assert_eq!(purged, 2);
        assert_eq!(store.telemetry_count("checkout").unwrap(), 1);
    }

    #[test]
    fn purges_zscores_older_than_cutoff() {
        let store = open_test_store();
        for (i, ts) in [100_i64, 200, 9_000].into_iter().enumerate() {
            store
                .insert_zscore(&ZScoreRecord {
                    service_id: "checkout".into(),
                    timestamp_ms: ts,
                    latency_zscore: i as f64,
                    payload_zscore: i as f64,
                    created_at_ms: ts,
                })
                .unwrap();
        }
        let purged = store.purge_zscores_older_than(1000).unwrap();
        assert_eq!(purged, 2);
        assert_eq!(store.recent_zscores("checkout", 10).unwrap().len(), 1);
    }
}
