//! Baseline Manager — decides when a service's baseline needs
//! recomputing and turns a window of raw telemetry into a
//! [`Baseline`] row.

use anyhow::Result;

use crate::clock::Clock;
use crate::config::ThresholdsConfig;
use crate::models::Baseline;
use crate::stats;
use crate::storage::Store;

/// Whether a fresh baseline computation is due for a service that has
/// `total_samples` telemetry rows recorded, given its `existing`
/// baseline (if any).
///
/// A baseline is (re)computed once `min_samples_for_baseline` is first
/// reached, and again every `baseline_recalc_interval` samples after
/// that — opportunistically, on the next ingest, not on a schedule.
pub fn should_recalculate(
    total_samples: u64,
    existing: Option<&Baseline>,
    cfg: &ThresholdsConfig,
) -> bool {
    if total_samples < cfg.min_samples_for_baseline {
        return false;
    }
    match existing {
        None => true,
        Some(b) => total_samples.saturating_sub(b.sample_count) >= cfg.baseline_recalc_interval,
    }
}

/// Recompute and persist the baseline for `service_id` from its most
/// recent `baseline_window_size` samples. Returns `None` when there
/// still aren't enough samples (a caller should have checked
/// [`should_recalculate`] first, but this stays defensive).
pub fn calculate_and_store(
    store: &dyn Store,
    clock: &dyn Clock,
    service_id: &str,
    cfg: &ThresholdsConfig,
) -> Result<Option<Baseline>> {
    let window = store.recent_telemetry(service_id, cfg.baseline_window_size)?;
    if (window.len() as u64) < cfg.min_samples_for_baseline {
        return Ok(None);
    }

    let latencies: Vec<f64> = window.iter().map(|s| s.latency_ms).collect();
    let payloads: Vec<f64> = window.iter().map(|s| s.payload_kb).collect();

    let latency_stats = stats::baseline(&latencies, cfg.min_samples_for_baseline as usize)?;
    let payload_stats = stats::baseline(&payloads, cfg.min_samples_for_baseline as usize)?;

    let now_ms = clock.now_ms();
    let existing = store.get_baseline(service_id)?;
    let created_at_ms = existing.map(|b| b.created_at_ms).unwrap_or(now_ms);

    let baseline = Baseline {
        service_id: service_id.to_string(),
        sample_count: latency_stats.sample_count as u64,
        mean_latency: latency_stats.mean,
        stddev_latency: latency_stats.stddev,
        mean_payload: payload_stats.mean,
        stddev_payload: payload_stats.stddev,
        p50_latency: latency_stats.p50,
        p95_latency: latency_stats.p95,
        p99_latency: latency_stats.p99,
        last_updated_ms: now_ms,
        created_at_ms,
    };

    store.put_baseline(&baseline)?;
    Ok(Some(baseline))
}
