//! Data model: telemetry samples, baselines, health state, and audit records.
//!
//! These mirror the entities in the data model section of the engine's
//! specification one-to-one. There is no separate request/response
//! validation framework; `ingest::Validator` enforces the field
//! invariants noted below at the boundary.

use serde::{Deserialize, Serialize};

/// Maximum length of a `service_id`, in bytes.
pub const MAX_SERVICE_ID_LEN: usize = 64;

/// A single per-request measurement submitted by a monitored service.
///
/// Invariants: `service_id` is non-empty, at most
/// [`MAX_SERVICE_ID_LEN`] bytes, and restricted to
/// `[A-Za-z0-9._-]`; `latency_ms` and `payload_kb` are non-negative and
/// bounded (`<= 300_000` and `<= 1_048_576` respectively). Rows are
/// append-only once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub service_id: String,
    pub timestamp_ms: i64,
    pub latency_ms: f64,
    pub payload_kb: f64,
    pub created_at_ms: i64,
}

/// Request body accepted by the ingestion pipeline. `timestamp_ms` is
/// optional; when absent, the engine stamps it with the injected clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRequest {
    pub service_id: String,
    pub latency_ms: f64,
    pub payload_kb: f64,
    pub timestamp_ms: Option<i64>,
}

/// Result of a successful `ingest` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestAccepted {
    pub service_id: String,
    pub timestamp_ms: i64,
    pub queue_size: usize,
}

/// Persisted statistical summary of recent samples for one service.
///
/// At most one row per `service_id`; replaced in place on recalculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub service_id: String,
    pub sample_count: u64,
    pub mean_latency: f64,
    pub stddev_latency: f64,
    pub mean_payload: f64,
    pub stddev_payload: f64,
    pub p50_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub last_updated_ms: i64,
    pub created_at_ms: i64,
}

/// Health classification of a tracked service. No terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStateKind {
    InsufficientData,
    Stable,
    DriftDetected,
}

impl HealthStateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientData => "INSUFFICIENT_DATA",
            Self::Stable => "STABLE",
            Self::DriftDetected => "DRIFT_DETECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSUFFICIENT_DATA" => Some(Self::InsufficientData),
            "STABLE" => Some(Self::Stable),
            "DRIFT_DETECTED" => Some(Self::DriftDetected),
            _ => None,
        }
    }
}

/// Tagged transition metadata — one variant per audit reason, in place
/// of a free-form map. Serializes to a JSON object stored verbatim in
/// the `metadata` / `evidence` columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TransitionReason {
    NewlyTracked,
    BaselineEstablished {
        sample_count: u64,
    },
    DriftConsecutiveSevere {
        consecutive_count: usize,
        threshold: f64,
        max_zscore: f64,
        current_latency_zscore: f64,
        current_payload_zscore: f64,
    },
    DriftModerateWindow {
        moderate_count: usize,
        window_size: usize,
        threshold: f64,
        current_latency_zscore: f64,
        current_payload_zscore: f64,
    },
    Recovered {
        recovery_samples: usize,
    },
    ManualReset,
}

impl TransitionReason {
    pub fn reason_tag(&self) -> &'static str {
        match self {
            Self::NewlyTracked => "newly_tracked",
            Self::BaselineEstablished { .. } => "baseline_established",
            Self::DriftConsecutiveSevere { .. } => "consecutive_severe_anomalies",
            Self::DriftModerateWindow { .. } => "moderate_anomalies_in_window",
            Self::Recovered { .. } => "recovered",
            Self::ManualReset => "manual_reset",
        }
    }
}

/// Exactly one row per tracked service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthState {
    pub service_id: String,
    pub state: HealthStateKind,
    pub transition_timestamp_ms: i64,
    pub metadata: TransitionReason,
}

/// Append-only audit record of a state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftEvent {
    pub id: i64,
    pub service_id: String,
    pub detected_at_ms: i64,
    pub previous_state: HealthStateKind,
    pub new_state: HealthStateKind,
    pub trigger_samples: Option<Vec<f64>>,
    pub metadata: TransitionReason,
}

/// Append-only z-score history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZScoreRecord {
    pub service_id: String,
    pub timestamp_ms: i64,
    pub latency_zscore: f64,
    pub payload_zscore: f64,
    pub created_at_ms: i64,
}

/// Full snapshot returned by `get_health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub service_id: String,
    pub state: HealthStateKind,
    pub transition_timestamp_ms: i64,
    pub sample_count: u64,
    pub baseline: Option<Baseline>,
    pub metadata: TransitionReason,
    pub recent_events: Vec<DriftEvent>,
}

/// Statistics exposed by the ingestion pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionStats {
    pub received: u64,
    pub processed: u64,
    pub rejected: u64,
    pub queue_size: usize,
    pub processing_rate: f64,
}
