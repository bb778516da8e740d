//! TOML configuration for the drift-detection engine.
//!
//! Layered load, following the reflector's configuration model: an
//! environment-variable override for the config file path, a standard
//! filesystem location, and compiled-in defaults matching the tunables
//! documented for this engine.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Root configuration for the driftwatch daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftWatchConfig {
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for DriftWatchConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdsConfig::default(),
            ingestion: IngestionConfig::default(),
            retention: RetentionConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl DriftWatchConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded driftwatch configuration");
        Ok(config)
    }

    /// Try, in order: the `DRIFTWATCH_CONFIG` env var, the standard
    /// system path, then compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("DRIFTWATCH_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "DRIFTWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/driftwatch/driftwatch.toml");
        if system_path.exists() {
            if let Ok(cfg) = Self::load(system_path) {
                return cfg;
            }
        }

        info!("using compiled-in default configuration");
        Self::default()
    }
}

/// Statistical thresholds driving the drift detector (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    pub min_samples_for_baseline: u64,
    pub baseline_window_size: u64,
    pub baseline_recalc_interval: u64,
    pub drift_zscore_threshold: f64,
    pub drift_consecutive_threshold: usize,
    pub drift_moderate_zscore_threshold: f64,
    pub drift_moderate_count: usize,
    pub drift_moderate_window: usize,
    pub recovery_consecutive_normal: usize,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            min_samples_for_baseline: 100,
            baseline_window_size: 1000,
            baseline_recalc_interval: 50,
            drift_zscore_threshold: 3.0,
            drift_consecutive_threshold: 5,
            drift_moderate_zscore_threshold: 2.5,
            drift_moderate_count: 10,
            drift_moderate_window: 20,
            recovery_consecutive_normal: 50,
        }
    }
}

/// Ingestion pipeline tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub timestamp_tolerance_hours: i64,
    pub queue_max: usize,
    pub worker_shards: usize,
    pub max_latency_ms: f64,
    pub max_payload_kb: f64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            timestamp_tolerance_hours: 1,
            queue_max: 10_000,
            worker_shards: 4,
            max_latency_ms: 300_000.0,
            max_payload_kb: 1_048_576.0,
        }
    }
}

/// Maintenance/retention sweep tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub telemetry_retention_days: i64,
    pub drift_events_retention_days: i64,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            telemetry_retention_days: 7,
            drift_events_retention_days: 30,
            sweep_interval_secs: 3600,
        }
    }
}

/// Storage backend location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/driftwatch.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = DriftWatchConfig::default();
        assert_eq!(cfg.thresholds.min_samples_for_baseline, 100);
        assert_eq!(cfg.thresholds.baseline_window_size, 1000);
        assert_eq!(cfg.thresholds.baseline_recalc_interval, 50);
        assert_eq!(cfg.thresholds.drift_consecutive_threshold, 5);
        assert_eq!(cfg.thresholds.drift_moderate_count, 10);
        assert_eq!(cfg.thresholds.drift_moderate_window, 20);
        assert_eq!(cfg.thresholds.recovery_consecutive_normal, 50);
        assert_eq!(cfg.ingestion.queue_max, 10_000);
        assert_eq!(cfg.retention.telemetry_retention_days, 7);
        assert_eq!(cfg.retention.drift_events_retention_days, 30);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = DriftWatchConfig::default();
        let s = toml::to_string(&cfg).unwrap();
        let parsed: DriftWatchConfig = toml::from_str(&s).unwrap();
        assert_eq!(parsed.thresholds.min_samples_for_baseline, 100);
    }
}
