//! Shared application state handed to every axum handler.

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::config::DriftWatchConfig;
use crate::ingest::{Ingestor, ServiceLocks};
use crate::storage::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub clock: SharedClock,
    pub cfg: Arc<DriftWatchConfig>,
    pub ingestor: Arc<Ingestor>,
    pub locks: ServiceLocks,
}
