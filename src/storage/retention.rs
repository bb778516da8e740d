//! Retention sweep — periodic deletion of telemetry, z-score, and
//! drift-event rows past their configured age, grounded on the
//! original engine's `cleanup_old_data` maintenance pass.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::RetentionConfig;
use crate::storage::Store;

/// Outcome of a single sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub telemetry_purged: u64,
    pub zscores_purged: u64,
    pub drift_events_purged: u64,
}

/// Delete telemetry and z-score rows older than
/// `telemetry_retention_days`, and drift events older than
/// `drift_events_retention_days`, relative to `clock.now_ms()`.
pub fn sweep_once(
    store: &dyn Store,
    clock: &dyn Clock,
    cfg: &RetentionConfig,
) -> anyhow::Result<SweepReport> {
    let now_ms = clock.now_ms();
    let telemetry_cutoff = now_ms - cfg.telemetry_retention_days * 24 * 60 * 60 * 1000;
    let drift_cutoff = now_ms - cfg.drift_events_retention_days * 24 * 60 * 60 * 1000;

    let telemetry_purged = store.purge_telemetry_older_than(telemetry_cutoff)?;
    let zscores_purged = store.purge_zscores_older_than(telemetry_cutoff)?;
    let drift_events_purged = store.purge_drift_events_older_than(drift_cutoff)?;

    Ok(SweepReport {
        telemetry_purged,
        zscores_purged,
        drift_events_purged,
    })
}

/// Spawn the background task that calls [`sweep_once`] on a fixed
/// interval for the life of the process.
pub fn spawn_periodic_sweep(
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    cfg: RetentionConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.sweep_interval_secs));
        loop {
            ticker.tick().await;
            let store = store.clone();
            let clock = clock.clone();
            let cfg = cfg.clone();
            let result =
                tokio::task::spawn_blocking(move || sweep_once(store.as_ref(), clock.as_ref(), &cfg))
                    .await;
            match result {
                Ok(Ok(report)) => {
                    if report.telemetry_purged > 0
                        || report.zscores_purged > 0
                        || report.drift_events_purged > 0
                    {
                        info!(
                            telemetry_purged = report.telemetry_purged,
                            zscores_purged = report.zscores_purged,
                            drift_events_purged = report.drift_events_purged,
                            "retention sweep complete"
                        );
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "retention sweep failed"),
                Err(e) => warn!(error = %e, "retention sweep task panicked"),
            }
        }
    })
}
