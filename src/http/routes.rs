//! Application routes served by the binary.

use axum::http::{StatusCode, Uri};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

/// Router for the service's own endpoints.
///
/// `/threads` is the resource the limiter protects by default. `/health` is
/// never limited.
pub fn app_router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/threads", get(thread_resource))
        .route("/threads/*rest", get(thread_resource))
        .fallback(not_found)
}

async fn health() -> &'static str {
    "OK"
}

async fn thread_resource(uri: Uri) -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": { "path": uri.path() },
    }))
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "status": "fail",
            "message": "Resource not found",
        })),
    )
}
