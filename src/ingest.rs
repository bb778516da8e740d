//! Ingestion Pipeline — validates inbound telemetry, applies
//! backpressure through a bounded channel per worker shard, and drains
//! each shard into the health state machine.
//!
//! Samples for the same `service_id` always hash to the same shard,
//! so a single worker processes them in submission order — no
//! additional sequencing is needed to keep per-service FIFO, mirroring
//! the single-queue draining loop of the original ingestion design but
//! split for throughput.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};

use crate::clock::SharedClock;
use crate::config::{DriftWatchConfig, IngestionConfig};
use crate::error::{DriftError, Result};
use crate::health;
use crate::models::{IngestAccepted, IngestionStats, TelemetryRequest, TelemetrySample, MAX_SERVICE_ID_LEN};
use crate::storage::Store;

/// Per-service critical section, shared between ingestion workers and
/// the manual-reset HTTP handler so a reset can't race a sample that's
/// mid-processing for the same service.
pub type ServiceLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

pub fn new_service_locks() -> ServiceLocks {
    Arc::new(DashMap::new())
}

fn service_lock(locks: &ServiceLocks, service_id: &str) -> Arc<Mutex<()>> {
    locks
        .entry(service_id.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Validates a [`TelemetryRequest`] and stamps it into a
/// [`TelemetrySample`], enforcing the field invariants from the data
/// model: `service_id` shape, non-negative bounded `latency_ms` /
/// `payload_kb`, and a `timestamp_ms` within tolerance of "now".
pub struct TelemetryValidator<'a> {
    cfg: &'a IngestionConfig,
    clock: &'a dyn crate::clock::Clock,
}

impl<'a> TelemetryValidator<'a> {
    pub fn new(cfg: &'a IngestionConfig, clock: &'a dyn crate::clock::Clock) -> Self {
        Self { cfg, clock }
    }

    pub fn validate(&self, req: &TelemetryRequest) -> Result<TelemetrySample> {
        if req.service_id.is_empty() || req.service_id.len() > MAX_SERVICE_ID_LEN {
            return Err(DriftError::Validation(format!(
                "service_id must be 1-{MAX_SERVICE_ID_LEN} bytes"
            )));
        }
        if !req
            .service_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(DriftError::Validation(
                "service_id may only contain [A-Za-z0-9._-]".to_string(),
            ));
        }
        if !req.latency_ms.is_finite() || req.latency_ms < 0.0 || req.latency_ms > self.cfg.max_latency_ms {
            return Err(DriftError::Validation(format!(
                "latency_ms must be within [0, {}]",
                self.cfg.max_latency_ms
            )));
        }
        if !req.payload_kb.is_finite() || req.payload_kb < 0.0 || req.payload_kb > self.cfg.max_payload_kb {
            return Err(DriftError::Validation(format!(
                "payload_kb must be within [0, {}]",
                self.cfg.max_payload_kb
            )));
        }

        let now_ms = self.clock.now_ms();
        let timestamp_ms = match req.timestamp_ms {
            Some(ts) => {
                let tolerance_ms = self.cfg.timestamp_tolerance_hours * 3_600_000;
                if (ts - now_ms).abs() > tolerance_ms {
                    return Err(DriftError::Validation(format!(
                        "timestamp_ms is outside the {}h tolerance window",
                        self.cfg.timestamp_tolerance_hours
                    )));
                }
                ts
            }
            None => now_ms,
        };

        Ok(TelemetrySample {
            service_id: req.service_id.clone(),
            timestamp_ms,
            latency_ms: req.latency_ms,
            payload_kb: req.payload_kb,
            created_at_ms: now_ms,
        })
    }
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    processed: AtomicU64,
    rejected: AtomicU64,
    queue_size: AtomicUsize,
}

/// Bounded, sharded ingestion front-end. Each shard is its own
/// `tokio::sync::mpsc` channel drained by a dedicated worker task, so
/// a slow or stuck service can't starve unrelated services' queues.
/// Every shard is sized at the full configured `queue_max`: a single
/// hot `service_id` always hashes to one shard, so it must see the
/// whole documented capacity rather than a fraction of it.
pub struct Ingestor {
    senders: Vec<mpsc::Sender<TelemetrySample>>,
    counters: Arc<Counters>,
    cfg: Arc<DriftWatchConfig>,
    clock: SharedClock,
}

impl Ingestor {
    pub fn spawn(store: Arc<dyn Store>, clock: SharedClock, cfg: Arc<DriftWatchConfig>, locks: ServiceLocks) -> Self {
        let shards = cfg.ingestion.worker_shards.max(1);
        let per_shard_capacity = cfg.ingestion.queue_max.max(1);
        let counters = Arc::new(Counters::default());

        let mut senders = Vec::with_capacity(shards);
        for shard_id in 0..shards {
            let (tx, rx) = mpsc::channel(per_shard_capacity);
            senders.push(tx);
            tokio::spawn(run_worker(shard_id, rx, store.clone(), clock.clone(), cfg.clone(), locks.clone(), counters.clone()));
        }

        Self {
            senders,
            counters,
            cfg,
            clock,
        }
    }

    /// Validate and enqueue a telemetry request. Returns
    /// [`DriftError::Backpressure`] if the owning shard's queue is
    /// full.
    pub async fn submit(&self, req: TelemetryRequest) -> Result<IngestAccepted> {
        let validator = TelemetryValidator::new(&self.cfg.ingestion, self.clock.as_ref());
        let sample = validator.validate(&req)?;

        let shard = shard_for(&sample.service_id, self.senders.len());
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        match self.senders[shard].try_send(sample.clone()) {
            Ok(()) => {
                self.counters.queue_size.fetch_add(1, Ordering::Relaxed);
                Ok(IngestAccepted {
                    service_id: sample.service_id,
                    timestamp_ms: sample.timestamp_ms,
                    queue_size: self.counters.queue_size.load(Ordering::Relaxed),
                })
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(DriftError::Backpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(DriftError::Backpressure)
            }
        }
    }

    pub fn stats(&self) -> IngestionStats {
        let received = self.counters.received.load(Ordering::Relaxed);
        let processed = self.counters.processed.load(Ordering::Relaxed);
        IngestionStats {
            received,
            processed,
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            queue_size: self.counters.queue_size.load(Ordering::Relaxed),
            processing_rate: if received == 0 {
                0.0
            } else {
                processed as f64 / received as f64
            },
        }
    }
}

fn shard_for(service_id: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    service_id.hash(&mut hasher);
    (hasher.finish() as usize) % shards
}

async fn run_worker(
    shard_id: usize,
    mut rx: mpsc::Receiver<TelemetrySample>,
    store: Arc<dyn Store>,
    clock: SharedClock,
    cfg: Arc<DriftWatchConfig>,
    locks: ServiceLocks,
    counters: Arc<Counters>,
) {
    while let Some(sample) = rx.recv().await {
        counters.queue_size.fetch_sub(1, Ordering::Relaxed);
        let lock = service_lock(&locks, &sample.service_id);
        let _guard = lock.lock().await;

        let store = store.clone();
        let clock = clock.clone();
        let cfg = cfg.clone();
        let service_id = sample.service_id.clone();
        let result = tokio::task::spawn_blocking(move || {
            health::process_telemetry(store.as_ref(), clock.as_ref(), &service_id, &sample, &cfg)
        })
        .await;

        match result {
            Ok(Ok(_)) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(shard = shard_id, error = %e, "failed to process telemetry sample");
            }
            Err(e) => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                error!(shard = shard_id, error = %e, "ingestion worker task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FixedClock;

    fn validator_cfg() -> IngestionConfig {
        IngestionConfig::default()
    }

    #[test]
    fn rejects_empty_service_id() {
        let clock = FixedClock::new(0);
        let cfg = validator_cfg();
        let validator = TelemetryValidator::new(&cfg, &clock);
        let req = TelemetryRequest {
            service_id: String::new(),
            latency_ms: 10.0,
            payload_kb: 1.0,
            timestamp_ms: None,
        };
        assert!(validator.validate(&req).is_err());
    }

    #[test]
    fn rejects_service_id_with_invalid_characters() {
        let clock = FixedClock::new(0);
        let cfg = validator_cfg();
        let validator = TelemetryValidator::new(&cfg, &clock);
        let req = TelemetryRequest {
            service_id: "checkout service".to_string(),
            latency_ms: 10.0,
            payload_kb: 1.0,
            timestamp_ms: None,
        };
        assert!(validator.validate(&req).is_err());
    }

    #[test]
    fn rejects_negative_latency() {
        let clock = FixedClock::new(0);
        let cfg = validator_cfg();
        let validator = TelemetryValidator::new(&cfg, &clock);
        let req = TelemetryRequest {
            service_id: "checkout".to_string(),
            latency_ms: -1.0,
            payload_kb: 1.0,
            timestamp_ms: None,
        };
        assert!(validator.validate(&req).is_err());
    }

    #[test]
    fn rejects_timestamp_outside_tolerance() {
        let clock = FixedClock::new(10_000_000);
        let cfg = validator_cfg();
        let validator = TelemetryValidator::new(&cfg, &clock);
        let req = TelemetryRequest {
            service_id: "checkout".to_string(),
            latency_ms: 10.0,
            payload_kb: 1.0,
            timestamp_ms: Some(10_000_000 - 2 * 3_600_000),
        };
        assert!(validator.validate(&req).is_err());
    }

    #[test]
    fn accepts_and_stamps_valid_request() {
        let clock = FixedClock::new(10_000_000);
        let cfg = validator_cfg();
        let validator = TelemetryValidator::new(&cfg, &clock);
        let req = TelemetryRequest {
            service_id: "checkout".to_string(),
            latency_ms: 120.0,
            payload_kb: 2.0,
            timestamp_ms: None,
        };
        let sample = validator.validate(&req).unwrap();
        assert_eq!(sample.timestamp_ms, 10_000_000);
        assert_eq!(sample.service_id, "checkout");
    }

    #[test]
    fn shard_for_is_stable_for_the_same_service_id() {
        assert_eq!(shard_for("checkout", 4), shard_for("checkout", 4));
    }

    /// A single hot service_id hashes to one shard, so it must see the
    /// whole configured queue capacity rather than `queue_max` divided
    /// across shards. `current_thread` keeps the worker task parked
    /// until every `submit` below has returned, since `validate` and
    /// `try_send` never yield: five concurrent sends against a
    /// capacity-4 queue must reject exactly one.
    #[tokio::test(flavor = "current_thread")]
    async fn a_single_hot_service_only_ever_rejects_the_overflow() {
        use crate::storage::memory::MemoryStore;

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock: SharedClock = Arc::new(FixedClock::new(0));
        let mut cfg = DriftWatchConfig::default();
        cfg.ingestion.queue_max = 4;
        let cfg = Arc::new(cfg);
        let locks = new_service_locks();
        let ingestor = Ingestor::spawn(store, clock, cfg, locks);

        let mut accepted = 0;
        let mut rejected = 0;
        for _ in 0..5 {
            let req = TelemetryRequest {
                service_id: "checkout".to_string(),
                latency_ms: 100.0,
                payload_kb: 1.0,
                timestamp_ms: None,
            };
            match ingestor.submit(req).await {
                Ok(_) => accepted += 1,
                Err(DriftError::Backpressure) => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(accepted, 4);
        assert_eq!(rejected, 1);
    }
}
