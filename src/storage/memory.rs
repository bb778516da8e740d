//! In-memory [`Store`] fake, for unit and integration tests that
//! shouldn't pay for a SQLite file.

use std::sync::Mutex;

use anyhow::Result;

use crate::models::{Baseline, DriftEvent, HealthState, TelemetrySample, ZScoreRecord};

use super::Store;

#[derive(Default)]
struct Tables {
    telemetry: Vec<TelemetrySample>,
    baselines: std::collections::HashMap<String, Baseline>,
    health_states: std::collections::HashMap<String, HealthState>,
    zscores: Vec<ZScoreRecord>,
    drift_events: Vec<DriftEvent>,
    next_event_id: i64,
}

/// Plain-`Vec`/`HashMap`-backed store behind a single mutex. Not meant
/// for production load, only for exercising the engine without a
/// filesystem dependency.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn insert_telemetry(&self, sample: &TelemetrySample) -> Result<()> {
        self.tables.lock().unwrap().telemetry.push(sample.clone());
        Ok(())
    }

    fn recent_telemetry(&self, service_id: &str, limit: u64) -> Result<Vec<TelemetrySample>> {
        let tables = self.tables.lock().unwrap();
        let mut matching: Vec<_> = tables
            .telemetry
            .iter()
            .filter(|s| s.service_id == service_id)
            .cloned()
            .collect();
        matching.reverse();
        matching.truncate(limit as usize);
        Ok(matching)
    }

    fn telemetry_count(&self, service_id: &str) -> Result<u64> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .telemetry
            .iter()
            .filter(|s| s.service_id == service_id)
            .count() as u64)
    }

    fn get_baseline(&self, service_id: &str) -> Result<Option<Baseline>> {
        Ok(self.tables.lock().unwrap().baselines.get(service_id).cloned())
    }

    fn put_baseline(&self, baseline: &Baseline) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .baselines
            .insert(baseline.service_id.clone(), baseline.clone());
        Ok(())
    }

    fn get_health_state(&self, service_id: &str) -> Result<Option<HealthState>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .health_states
            .get(service_id)
            .cloned())
    }

    fn put_health_state(&self, state: &HealthState) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .health_states
            .insert(state.service_id.clone(), state.clone());
        Ok(())
    }

    fn insert_zscore(&self, record: &ZScoreRecord) -> Result<()> {
        self.tables.lock().unwrap().zscores.push(record.clone());
        Ok(())
    }

    fn recent_zscores(&self, service_id: &str, limit: u64) -> Result<Vec<ZScoreRecord>> {
        let tables = self.tables.lock().unwrap();
        let mut matching: Vec<_> = tables
            .zscores
            .iter()
            .filter(|z| z.service_id == service_id)
            .cloned()
            .collect();
        matching.reverse();
        matching.truncate(limit as usize);
        Ok(matching)
    }

    fn insert_drift_event(&self, event: &DriftEvent) -> Result<i64> {
        let mut tables = self.tables.lock().unwrap();
        tables.next_event_id += 1;
        let id = tables.next_event_id;
        let mut stored = event.clone();
        stored.id = id;
        tables.drift_events.push(stored);
        Ok(id)
    }

    fn recent_drift_events(&self, service_id: &str, limit: u64) -> Result<Vec<DriftEvent>> {
        let tables = self.tables.lock().unwrap();
        let mut matching: Vec<_> = tables
            .drift_events
            .iter()
            .filter(|e| e.service_id == service_id)
            .cloned()
            .collect();
        matching.reverse();
        matching.truncate(limit as usize);
        Ok(matching)
    }

    fn reset_service(&self, service_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.baselines.remove(service_id);
        tables.health_states.remove(service_id);
        tables.zscores.retain(|z| z.service_id != service_id);
        Ok(())
    }

    fn list_tracked_services(&self) -> Result<Vec<String>> {
        let mut services: Vec<String> = self
            .tables
            .lock()
            .unwrap()
            .health_states
            .keys()
            .cloned()
            .collect();
        services.sort();
        Ok(services)
    }

    fn purge_telemetry_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let mut tables = self.tables.lock().unwrap();
        let before = tables.telemetry.len();
        tables.telemetry.retain(|s| s.created_at_ms >= cutoff_ms);
        Ok((before - tables.telemetry.len()) as u64)
    }

    fn purge_drift_events_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let mut tables = self.tables.lock().unwrap();
        let before = tables.drift_events.len();
        tables.drift_events.retain(|e| e.detected_at_ms >= cutoff_ms);
        Ok((before - tables.drift_events.len()) as u64)
    }

    fn purge_zscores_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let mut tables = self.tables.lock().unwrap();
        let before = tables.zscores.len();
        tables.zscores.retain(|z| z.created_at_ms >= cutoff_ms);
        Ok((before - tables.zscores.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_telemetry_is_newest_first_and_bounded() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .insert_telemetry(&TelemetrySample {
                    service_id: "checkout".into(),
                    timestamp_ms: i,
                    latency_ms: i as f64,
                    payload_kb: 1.0,
                    created_at_ms: i,
                })
                .unwrap();
        }
        let recent = store.recent_telemetry("checkout", 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp_ms, 4);
        assert_eq!(recent[2].timestamp_ms, 2);
    }

    #[test]
    fn reset_leaves_telemetry_intact() {
        let store = MemoryStore::new();
        store
            .insert_telemetry(&TelemetrySample {
                service_id: "checkout".into(),
                timestamp_ms: 1,
                latency_ms: 1.0,
                payload_kb: 1.0,
                created_at_ms: 1,
            })
            .unwrap();
        store.reset_service("checkout").unwrap();
        assert_eq!(store.telemetry_count("checkout").unwrap(), 1);
    }
}
