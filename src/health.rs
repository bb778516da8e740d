//! Health State Manager — the orchestrator tying baseline
//! computation, z-score scoring, and drift/recovery detection
//! together into the per-service state machine:
//!
//! ```text
//! INSUFFICIENT_DATA -> STABLE -> DRIFT_DETECTED -> STABLE -> ...
//! ```
//!
//! There is no terminal state; a service can cycle between `STABLE`
//! and `DRIFT_DETECTED` indefinitely.

use anyhow::Result;

use crate::baseline;
use crate::clock::Clock;
use crate::config::DriftWatchConfig;
use crate::detect;
use crate::models::{
    DriftEvent, HealthSnapshot, HealthState, HealthStateKind, TelemetrySample, TransitionReason,
    ZScoreRecord,
};
use crate::stats::{self, DriftRule};
use crate::storage::Store;

const DRIFT_EVENT_HISTORY: u64 = 20;

fn default_state(service_id: &str, now_ms: i64) -> HealthState {
    HealthState {
        service_id: service_id.to_string(),
        state: HealthStateKind::InsufficientData,
        transition_timestamp_ms: now_ms,
        metadata: TransitionReason::NewlyTracked,
    }
}

fn record_transition(
    store: &dyn Store,
    service_id: &str,
    now_ms: i64,
    previous: HealthStateKind,
    new_state: HealthStateKind,
    reason: TransitionReason,
    trigger_samples: Option<Vec<f64>>,
) -> Result<HealthState> {
    let state = HealthState {
        service_id: service_id.to_string(),
        state: new_state,
        transition_timestamp_ms: now_ms,
        metadata: reason.clone(),
    };
    store.put_health_state(&state)?;

    if previous != new_state {
        store.insert_drift_event(&DriftEvent {
            id: 0,
            service_id: service_id.to_string(),
            detected_at_ms: now_ms,
            previous_state: previous,
            new_state,
            trigger_samples,
            metadata: reason,
        })?;
    }

    Ok(state)
}

/// Process one telemetry sample for `service_id`: persist it, score
/// it against the current baseline, recompute the baseline when due,
/// and run drift/recovery detection. Returns the service's health
/// state after processing.
pub fn process_telemetry(
    store: &dyn Store,
    clock: &dyn Clock,
    service_id: &str,
    sample: &TelemetrySample,
    cfg: &DriftWatchConfig,
) -> Result<HealthState> {
    store.insert_telemetry(sample)?;

    let now_ms = clock.now_ms();
    let total_samples = store.telemetry_count(service_id)?;
    let existing_baseline = store.get_baseline(service_id)?;
    let current_state = store
        .get_health_state(service_id)?
        .unwrap_or_else(|| default_state(service_id, now_ms));

    let due_for_recalc =
        baseline::should_recalculate(total_samples, existing_baseline.as_ref(), &cfg.thresholds);
    let recalculated = if due_for_recalc {
        baseline::calculate_and_store(store, clock, service_id, &cfg.thresholds)?
    } else {
        None
    };

    // The baseline that was just established on this very sample can't
    // be used to score that same sample without circularity, so a
    // birthing sample skips z-scoring and drift evaluation entirely.
    if existing_baseline.is_none() {
        return match recalculated {
            Some(b) => record_transition(
                store,
                service_id,
                now_ms,
                current_state.state,
                HealthStateKind::Stable,
                TransitionReason::BaselineEstablished {
                    sample_count: b.sample_count,
                },
                None,
            ),
            None => {
                if store.get_health_state(service_id)?.is_none() {
                    store.put_health_state(&current_state)?;
                }
                Ok(current_state)
            }
        };
    }

    let active_baseline = recalculated.or(existing_baseline).expect("checked above");

    let latency_zscore = stats::zscore(
        sample.latency_ms,
        active_baseline.mean_latency,
        active_baseline.stddev_latency,
    );
    let payload_zscore = stats::zscore(
        sample.payload_kb,
        active_baseline.mean_payload,
        active_baseline.stddev_payload,
    );
    store.insert_zscore(&ZScoreRecord {
        service_id: service_id.to_string(),
        timestamp_ms: sample.timestamp_ms,
        latency_zscore,
        payload_zscore,
        created_at_ms: now_ms,
    })?;

    match current_state.state {
        HealthStateKind::Stable => {
            let (drift, rule) = detect::evaluate(store, service_id, &cfg.thresholds)?;
            if drift {
                let reason = drift_reason(rule, latency_zscore, payload_zscore);
                let trigger_samples = store
                    .recent_zscores(service_id, DRIFT_EVENT_HISTORY)?
                    .into_iter()
                    .map(|z| z.latency_zscore)
                    .collect();
                return record_transition(
                    store,
                    service_id,
                    now_ms,
                    HealthStateKind::Stable,
                    HealthStateKind::DriftDetected,
                    reason,
                    Some(trigger_samples),
                );
            }
            store.put_health_state(&current_state)?;
            Ok(current_state)
        }
        HealthStateKind::DriftDetected => {
            if detect::check_recovery(store, service_id, &cfg.thresholds)? {
                return record_transition(
                    store,
                    service_id,
                    now_ms,
                    HealthStateKind::DriftDetected,
                    HealthStateKind::Stable,
                    TransitionReason::Recovered {
                        recovery_samples: cfg.thresholds.recovery_consecutive_normal,
                    },
                    None,
                );
            }
            store.put_health_state(&current_state)?;
            Ok(current_state)
        }
        HealthStateKind::InsufficientData => {
            // Baseline already existed (checked above) so this state is
            // stale; bring it in line without waiting for the next sample.
            record_transition(
                store,
                service_id,
                now_ms,
                HealthStateKind::InsufficientData,
                HealthStateKind::Stable,
                TransitionReason::BaselineEstablished {
                    sample_count: active_baseline.sample_count,
                },
                None,
            )
        }
    }
}

fn drift_reason(rule: DriftRule, latency_zscore: f64, payload_zscore: f64) -> TransitionReason {
    match rule {
        DriftRule::ConsecutiveSevere {
            consecutive_count,
            threshold,
            max_zscore,
        } => TransitionReason::DriftConsecutiveSevere {
            consecutive_count,
            threshold,
            max_zscore,
            current_latency_zscore: latency_zscore,
            current_payload_zscore: payload_zscore,
        },
        DriftRule::ModerateWindow {
            moderate_count,
            window_size,
            threshold,
        } => TransitionReason::DriftModerateWindow {
            moderate_count,
            window_size,
            threshold,
            current_latency_zscore: latency_zscore,
            current_payload_zscore: payload_zscore,
        },
        DriftRule::InsufficientSamples { .. } | DriftRule::NoDrift { .. } => {
            unreachable!("drift_reason called without a fired drift rule")
        }
    }
}

/// The current state of `service_id`, or `None` if it has never been
/// seen.
pub fn get_current_state(store: &dyn Store, service_id: &str) -> Result<Option<HealthStateKind>> {
    Ok(store.get_health_state(service_id)?.map(|s| s.state))
}

/// Full snapshot used by the health API endpoint. A service is
/// implicitly created the first time its health is queried: an
/// unknown `service_id` gets an `INSUFFICIENT_DATA` row written on the
/// spot, the same lazy-creation path `process_telemetry` uses.
pub fn get_detailed_health(
    store: &dyn Store,
    clock: &dyn Clock,
    service_id: &str,
) -> Result<HealthSnapshot> {
    let state = match store.get_health_state(service_id)? {
        Some(state) => state,
        None => {
            let state = default_state(service_id, clock.now_ms());
            store.put_health_state(&state)?;
            state
        }
    };
    let baseline = store.get_baseline(service_id)?;
    let sample_count = store.telemetry_count(service_id)?;
    let recent_events = store.recent_drift_events(service_id, DRIFT_EVENT_HISTORY)?;

    Ok(HealthSnapshot {
        service_id: service_id.to_string(),
        state: state.state,
        transition_timestamp_ms: state.transition_timestamp_ms,
        sample_count,
        baseline,
        metadata: state.metadata,
        recent_events,
    })
}

/// Manually reset a service back to its untracked state: clears its
/// baseline, z-score history, and health state, and records the reset
/// as an audit event. Telemetry history is untouched.
pub fn reset_service(store: &dyn Store, clock: &dyn Clock, service_id: &str) -> Result<()> {
    let now_ms = clock.now_ms();
    let previous = store
        .get_health_state(service_id)?
        .map(|s| s.state)
        .unwrap_or(HealthStateKind::InsufficientData);

    store.reset_service(service_id)?;

    if previous != HealthStateKind::InsufficientData {
        store.insert_drift_event(&DriftEvent {
            id: 0,
            service_id: service_id.to_string(),
            detected_at_ms: now_ms,
            previous_state: previous,
            new_state: HealthStateKind::InsufficientData,
            trigger_samples: None,
            metadata: TransitionReason::ManualReset,
        })?;
    }

    Ok(())
}
