//! End-to-end exercise of the HTTP surface against an in-memory store.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use driftwatch::api::{self, AppState};
use driftwatch::clock::test_support::FixedClock;
use driftwatch::config::DriftWatchConfig;
use driftwatch::ingest::{new_service_locks, Ingestor};
use driftwatch::storage::memory::MemoryStore;

fn test_app() -> axum::Router {
    let store: Arc<dyn driftwatch::storage::Store> = Arc::new(MemoryStore::new());
    let clock: driftwatch::clock::SharedClock = Arc::new(FixedClock::new(1_700_000_000_000));
    let cfg = Arc::new(DriftWatchConfig::default());
    let locks = new_service_locks();
    let ingestor = Arc::new(Ingestor::spawn(store.clone(), clock.clone(), cfg.clone(), locks.clone()));

    let state = AppState {
        store,
        clock,
        cfg,
        ingestor,
        locks,
    };
    api::router(state)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn telemetry_submission_is_accepted_and_visible_in_stats() {
    let app = test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/telemetry")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "service_id": "checkout",
                "latency_ms": 120.0,
                "payload_kb": 2.0
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["data"]["service_id"], "checkout");

    // Give the background worker a moment to drain the channel.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let stats_request = Request::builder()
        .uri("/api/v1/stats")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(stats_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["received"], 1);
}

#[tokio::test]
async fn rejects_telemetry_with_invalid_service_id() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/telemetry")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "service_id": "",
                "latency_ms": 120.0,
                "payload_kb": 2.0
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_lookup_implicitly_creates_an_unknown_service() {
    let app = test_app();
    let request = Request::builder()
        .uri("/api/v1/services/unknown-service/health")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["state"], "INSUFFICIENT_DATA");
    assert_eq!(body["data"]["sample_count"], 0);
}

#[tokio::test]
async fn reset_an_unknown_service_is_a_no_op_success() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/services/unknown-service/reset")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
