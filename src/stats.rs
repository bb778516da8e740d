//! Statistical Kernel — pure functions over sample arrays.
//!
//! No I/O, no shared state: every function here is a plain
//! computation and is therefore trivially thread-safe. This is the
//! leaf of the drift-detection engine; every other module calls down
//! into it but nothing here calls back up.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum StatsError {
    #[error("insufficient samples: need {needed}, have {have}")]
    InsufficientSamples { needed: usize, have: usize },
}

/// Mean, sample stddev (Bessel-corrected), and percentiles of a window
/// of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub mean: f64,
    pub stddev: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub sample_count: usize,
}

/// Compute baseline statistics from a window of samples.
///
/// Requires `samples.len() >= min_samples`. Standard deviation uses the
/// `n - 1` (sample) divisor. Percentiles use linear interpolation
/// between closest ranks, matching `numpy.percentile`'s default
/// `'linear'` method.
pub fn baseline(samples: &[f64], min_samples: usize) -> Result<BaselineStats, StatsError> {
    if samples.len() < min_samples {
        return Err(StatsError::InsufficientSamples {
            needed: min_samples,
            have: samples.len(),
        });
    }

    let n = samples.len();
    let mean = samples.iter().sum::<f64>() / n as f64;

    let stddev = if n > 1 {
        let sum_sq_diff: f64 = samples.iter().map(|x| (x - mean).powi(2)).sum();
        (sum_sq_diff / (n as f64 - 1.0)).sqrt()
    } else {
        0.0
    };

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    Ok(BaselineStats {
        mean,
        stddev,
        p50: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        sample_count: n,
    })
}

/// Linear-interpolation percentile over an already-sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// Z-score of `x` against a baseline mean/stddev. Zero when `stddev`
/// is zero (a constant baseline has no meaningful deviation scale).
pub fn zscore(x: f64, mean: f64, stddev: f64) -> f64 {
    if stddev == 0.0 {
        0.0
    } else {
        (x - mean) / stddev
    }
}

/// Whether a z-score represents a statistically severe deviation.
pub fn is_anomaly(z: f64, threshold: f64) -> bool {
    z.abs() > threshold
}

/// The rule (if any) that fired during `detect_drift`, carrying the
/// evidence behind the verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum DriftRule {
    InsufficientSamples {
        sample_count: usize,
    },
    ConsecutiveSevere {
        consecutive_count: usize,
        threshold: f64,
        max_zscore: f64,
    },
    ModerateWindow {
        moderate_count: usize,
        window_size: usize,
        threshold: f64,
    },
    NoDrift {
        consecutive_count: usize,
        recent_anomalies: usize,
    },
}

/// Parameters for [`detect_drift`], grouped so call sites can thread a
/// single config-derived value instead of five positional floats.
#[derive(Debug, Clone, Copy)]
pub struct DriftThresholds {
    pub severe_zscore: f64,
    pub consecutive_count: usize,
    pub moderate_zscore: f64,
    pub moderate_count: usize,
    pub moderate_window: usize,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            severe_zscore: 3.0,
            consecutive_count: 5,
            moderate_zscore: 2.5,
            moderate_count: 10,
            moderate_window: 20,
        }
    }
}

/// Evaluate the two drift rules over a newest-first z-score history.
///
/// Rule A (consecutive severe) is checked first; ties break in its
/// favor. Rule B (moderate-in-window) only applies once the history is
/// at least `thresholds.moderate_window` long.
pub fn detect_drift(zs: &[f64], thresholds: &DriftThresholds) -> (bool, DriftRule) {
    if zs.len() < thresholds.consecutive_count {
        return (
            false,
            DriftRule::InsufficientSamples {
                sample_count: zs.len(),
            },
        );
    }

    let prefix = &zs[..thresholds.consecutive_count];
    let mut consecutive_count = 0;
    for z in prefix {
        if is_anomaly(*z, thresholds.severe_zscore) {
            consecutive_count += 1;
        } else {
            break;
        }
    }

    if consecutive_count >= thresholds.consecutive_count {
        let max_zscore = prefix.iter().map(|z| z.abs()).fold(0.0, f64::max);
        return (
            true,
            DriftRule::ConsecutiveSevere {
                consecutive_count,
                threshold: thresholds.severe_zscore,
                max_zscore,
            },
        );
    }

    if zs.len() >= thresholds.moderate_window {
        let window = &zs[..thresholds.moderate_window];
        let moderate_count = window
            .iter()
            .filter(|z| is_anomaly(**z, thresholds.moderate_zscore))
            .count();

        if moderate_count >= thresholds.moderate_count {
            return (
                true,
                DriftRule::ModerateWindow {
                    moderate_count,
                    window_size: thresholds.moderate_window,
                    threshold: thresholds.moderate_zscore,
                },
            );
        }
    }

    let lookback = zs.len().min(10);
    let recent_anomalies = zs[..lookback]
        .iter()
        .filter(|z| is_anomaly(**z, thresholds.severe_zscore))
        .count();

    (
        false,
        DriftRule::NoDrift {
            consecutive_count,
            recent_anomalies,
        },
    )
}

/// Whether a service has recovered: the most recent `n` z-scores (newest
/// first) are all within the (looser) normal band `|z| <= 2.0`.
pub fn is_recovered(zs: &[f64], n: usize) -> bool {
    const RECOVERY_BAND: f64 = 2.0;
    if zs.len() < n {
        return false;
    }
    zs[..n].iter().all(|z| z.abs() <= RECOVERY_BAND)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> DriftThresholds {
        DriftThresholds::default()
    }

    #[test]
    fn baseline_requires_minimum_samples() {
        let samples = vec![1.0; 5];
        let err = baseline(&samples, 100).unwrap_err();
        assert_eq!(
            err,
            StatsError::InsufficientSamples {
                needed: 100,
                have: 5
            }
        );
    }

    #[test]
    fn baseline_on_constant_series_has_zero_stddev() {
        let samples = vec![150.0; 100];
        let b = baseline(&samples, 100).unwrap();
        assert_eq!(b.mean, 150.0);
        assert_eq!(b.stddev, 0.0);
        assert_eq!(b.p50, 150.0);
        assert_eq!(b.sample_count, 100);
    }

    #[test]
    fn baseline_percentiles_match_linear_interpolation_fixture() {
        // 1..=11, so rank(p50) = 0.5 * 10 = 5 -> index 5 -> value 6.
        // rank(p95) = 0.95 * 10 = 9.5 -> between index 9 (10) and 10 (11) -> 10.5.
        let samples: Vec<f64> = (1..=11).map(|x| x as f64).collect();
        // pad to satisfy MIN_SAMPLES in the general case; use a direct
        // min_samples of the fixture's own length here.
        let b = baseline(&samples, 11).unwrap();
        assert!((b.p50 - 6.0).abs() < 1e-9);
        assert!((b.p95 - 10.5).abs() < 1e-9);
    }

    #[test]
    fn zscore_is_zero_for_zero_stddev() {
        assert_eq!(zscore(500.0, 150.0, 0.0), 0.0);
    }

    #[test]
    fn zscore_matches_formula() {
        let z = zscore(200.0, 150.0, 25.0);
        assert!((z - 2.0).abs() < 1e-9);
    }

    #[test]
    fn is_anomaly_uses_strict_greater_than() {
        assert!(!is_anomaly(3.0, 3.0));
        assert!(is_anomaly(3.0001, 3.0));
        assert!(is_anomaly(-3.0001, 3.0));
    }

    #[test]
    fn detect_drift_reports_insufficient_samples_below_consecutive_threshold() {
        let zs = vec![4.0, 4.0];
        let (drift, rule) = detect_drift(&zs, &thresholds());
        assert!(!drift);
        assert_eq!(rule, DriftRule::InsufficientSamples { sample_count: 2 });
    }

    #[test]
    fn detect_drift_fires_rule_a_on_five_consecutive_severe() {
        let zs = vec![3.5, -3.2, 4.0, 3.1, 10.0, 0.1, 0.2];
        let (drift, rule) = detect_drift(&zs, &thresholds());
        assert!(drift);
        match rule {
            DriftRule::ConsecutiveSevere {
                consecutive_count,
                max_zscore,
                ..
            } => {
                assert_eq!(consecutive_count, 5);
                assert!((max_zscore - 10.0).abs() < 1e-9);
            }
            other => panic!("expected ConsecutiveSevere, got {other:?}"),
        }
    }

    #[test]
    fn detect_drift_rule_a_breaks_on_first_normal_sample() {
        // Only 4 consecutive anomalies before a normal sample breaks the run.
        let zs = vec![3.5, 3.5, 3.5, 3.5, 0.5, 10.0, 10.0];
        let (drift, rule) = detect_drift(&zs, &thresholds());
        assert!(!drift);
        assert!(matches!(rule, DriftRule::NoDrift { .. }));
    }

    #[test]
    fn detect_drift_fires_rule_b_on_moderate_window() {
        // 10 of the first 20 exceed 2.5 in magnitude, none trigger rule A.
        let mut zs = Vec::new();
        for _ in 0..10 {
            zs.push(2.8);
            zs.push(0.1);
        }
        assert_eq!(zs.len(), 20);
        let (drift, rule) = detect_drift(&zs, &thresholds());
        assert!(drift);
        match rule {
            DriftRule::ModerateWindow { moderate_count, .. } => assert_eq!(moderate_count, 10),
            other => panic!("expected ModerateWindow, got {other:?}"),
        }
    }

    #[test]
    fn detect_drift_rule_a_takes_priority_on_ties() {
        // Satisfies both rule A (5 consecutive severe) and would also
        // satisfy rule B; rule A must win.
        let mut zs = vec![10.0; 5];
        zs.extend(std::iter::repeat(2.8).take(15));
        let (drift, rule) = detect_drift(&zs, &thresholds());
        assert!(drift);
        assert!(matches!(rule, DriftRule::ConsecutiveSevere { .. }));
    }

    #[test]
    fn is_recovered_requires_full_window() {
        let zs = vec![0.1; 49];
        assert!(!is_recovered(&zs, 50));
    }

    #[test]
    fn is_recovered_true_when_all_within_band() {
        let zs = vec![1.9; 50];
        assert!(is_recovered(&zs, 50));
    }

    #[test]
    fn is_recovered_false_if_any_sample_exceeds_band() {
        let mut zs = vec![0.1; 49];
        zs.push(2.1);
        assert!(!is_recovered(&zs, 50));
    }
}
