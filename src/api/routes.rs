//! HTTP surface: telemetry ingestion, per-service health/baseline
//! lookups, manual reset, and pipeline stats.
//!
//! Every handler replies with the same envelope: `{"data": ..., "meta":
//! {...}}` on success, `{"error": {"message": ...}}` on failure.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::error::DriftError;
use crate::health;
use crate::models::TelemetryRequest;

use super::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/telemetry", post(ingest_telemetry))
        .route("/services/{service_id}/health", get(get_health))
        .route("/services/{service_id}/baseline", get(get_baseline))
        .route("/services/{service_id}/reset", post(reset_service))
        .route("/stats", get(get_stats))
        .with_state(state)
}

struct ApiError(StatusCode, String);

impl From<DriftError> for ApiError {
    fn from(e: DriftError) -> Self {
        let status = match &e {
            DriftError::Validation(_) => StatusCode::BAD_REQUEST,
            DriftError::Backpressure => StatusCode::SERVICE_UNAVAILABLE,
            DriftError::NotFound(_) => StatusCode::NOT_FOUND,
            DriftError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": { "message": self.1 } }))).into_response()
    }
}

fn ok<T: serde::Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(json!({ "data": data, "meta": {} }))).into_response()
}

async fn ingest_telemetry(
    State(state): State<AppState>,
    Json(req): Json<TelemetryRequest>,
) -> Result<Response, ApiError> {
    let accepted = state.ingestor.submit(req).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "data": accepted, "meta": {} }))).into_response())
}

async fn get_health(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Response, ApiError> {
    let clock = state.clock.clone();
    let snapshot = spawn_store(state.store.clone(), move |store| {
        health::get_detailed_health(store, clock.as_ref(), &service_id)
    })
    .await
    .map_err(DriftError::Store)?;

    Ok(ok(snapshot))
}

async fn get_baseline(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Response, ApiError> {
    let service_id_for_err = service_id.clone();
    let baseline = spawn_store(state.store.clone(), move |store| store.get_baseline(&service_id))
        .await
        .map_err(DriftError::Store)?;

    match baseline {
        Some(baseline) => Ok(ok(baseline)),
        None => Err(DriftError::NotFound(format!(
            "no baseline recorded for service '{service_id_for_err}'"
        ))
        .into()),
    }
}

async fn reset_service(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Response, ApiError> {
    let lock = state
        .locks
        .entry(service_id.clone())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone();
    let _guard = lock.lock().await;

    let store = state.store.clone();
    let clock = state.clock.clone();
    let service_id_for_task = service_id.clone();
    spawn_store(store, move |store| {
        health::reset_service(store, clock.as_ref(), &service_id_for_task)
    })
    .await
    .map_err(DriftError::Store)?;

    Ok(ok(json!({ "service_id": service_id, "reset": true })))
}

async fn get_stats(State(state): State<AppState>) -> Response {
    ok(state.ingestor.stats())
}

/// Run a blocking store operation off the async runtime's worker
/// threads, the same way the engine's spawn_blocking wraps every
/// rusqlite call.
async fn spawn_store<F, T>(store: Arc<dyn crate::storage::Store>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&dyn crate::storage::Store) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(store.as_ref())).await?
}
