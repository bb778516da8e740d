//! DriftWatch -- statistical drift detection for service telemetry.
//!
//! Samples flow in through the ingestion pipeline, get scored against
//! a per-service baseline, and the health state manager walks each
//! service through `INSUFFICIENT_DATA -> STABLE -> DRIFT_DETECTED ->
//! STABLE -> ...` as the statistics warrant.

pub mod api;
pub mod baseline;
pub mod clock;
pub mod config;
pub mod detect;
pub mod error;
pub mod health;
pub mod ingest;
pub mod models;
pub mod stats;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;

use clock::SystemClock;
use config::DriftWatchConfig;
use ingest::Ingestor;
use storage::SqliteStore;

/// Start the DriftWatch daemon: opens the store, spawns the retention
/// sweep and ingestion workers, and serves the HTTP API until the
/// process is killed.
pub async fn serve(bind: &str, cfg: DriftWatchConfig) -> Result<()> {
    tracing::info!(db_path = %cfg.storage.db_path, "opening database");
    let pool = storage::open_pool(&cfg.storage.db_path)?;
    let store: Arc<dyn storage::Store> = Arc::new(SqliteStore::new(pool));

    let clock: clock::SharedClock = Arc::new(SystemClock);
    let cfg = Arc::new(cfg);
    let locks = ingest::new_service_locks();

    storage::retention::spawn_periodic_sweep(store.clone(), clock.clone(), cfg.retention.clone());

    let ingestor = Arc::new(Ingestor::spawn(
        store.clone(),
        clock.clone(),
        cfg.clone(),
        locks.clone(),
    ));

    let state = api::AppState {
        store,
        clock,
        cfg,
        ingestor,
        locks,
    };

    let app = api::router(state);

    let addr: std::net::SocketAddr = bind.parse()?;
    tracing::info!(%addr, "driftwatch listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
