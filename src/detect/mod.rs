//! Drift Detector — turns a service's recent z-score history into a
//! drift/no-drift verdict, and checks whether a drifting service has
//! recovered.
//!
//! Only the latency z-score gates these decisions. The payload
//! z-score is still recorded on every sample (see
//! [`crate::models::ZScoreRecord`]) for observability, but by design
//! never feeds a state transition.

use anyhow::Result;

use crate::config::ThresholdsConfig;
use crate::models::ZScoreRecord;
use crate::stats::{self, DriftRule, DriftThresholds};
use crate::storage::Store;

fn drift_thresholds(cfg: &ThresholdsConfig) -> DriftThresholds {
    DriftThresholds {
        severe_zscore: cfg.drift_zscore_threshold,
        consecutive_count: cfg.drift_consecutive_threshold,
        moderate_zscore: cfg.drift_moderate_zscore_threshold,
        moderate_count: cfg.drift_moderate_count,
        moderate_window: cfg.drift_moderate_window,
    }
}

/// Evaluate the drift rules over the most recent latency z-scores for
/// `service_id`.
pub fn evaluate(
    store: &dyn Store,
    service_id: &str,
    cfg: &ThresholdsConfig,
) -> Result<(bool, DriftRule)> {
    let window_size = cfg.drift_moderate_window.max(cfg.drift_consecutive_threshold);
    let zs = latency_zscores(store, service_id, window_size as u64)?;
    Ok(stats::detect_drift(&zs, &drift_thresholds(cfg)))
}

/// Whether `service_id` has recovered: its most recent
/// `recovery_consecutive_normal` latency z-scores are all within the
/// hysteresis band.
pub fn check_recovery(store: &dyn Store, service_id: &str, cfg: &ThresholdsConfig) -> Result<bool> {
    let zs = latency_zscores(store, service_id, cfg.recovery_consecutive_normal as u64)?;
    Ok(stats::is_recovered(&zs, cfg.recovery_consecutive_normal))
}

fn latency_zscores(store: &dyn Store, service_id: &str, limit: u64) -> Result<Vec<f64>> {
    let records: Vec<ZScoreRecord> = store.recent_zscores(service_id, limit)?;
    Ok(records.iter().map(|r| r.latency_zscore).collect())
}
