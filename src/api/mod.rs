//! HTTP API surface.

pub mod routes;
pub mod state;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the full axum router: versioned API routes under `/api/v1`,
/// request tracing, permissive CORS, and a JSON 404 fallback.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::router(state))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({ "error": { "message": "no such route" } })),
    )
}
