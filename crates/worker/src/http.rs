//! Health and metrics endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use pkgvet_core::worker::WorkerStatus;
use pkgvet_core::{PackageStore, SanitizedConfig, Stage, Worker};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};

/// Shared state of the HTTP handlers.
pub struct AppState<S: Stage> {
    pub worker: Arc<Worker<S>>,
    pub store: Arc<dyn PackageStore>,
    pub config: SanitizedConfig,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub worker: WorkerStatus,
}

pub fn create_router<S: Stage>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/health", get(health::<S>))
        .route("/metrics", get(metrics::<S>))
        .route("/config", get(config::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 200 while the worker loop runs, 503 otherwise.
async fn health<S: Stage>(State(state): State<Arc<AppState<S>>>) -> impl IntoResponse {
    let worker = state.worker.status().await;
    let (code, status) = if worker.running {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "stopped")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            worker,
        }),
    )
}

async fn metrics<S: Stage>(State(state): State<Arc<AppState<S>>>) -> impl IntoResponse {
    collect_dynamic_metrics(state.store.as_ref());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}

async fn config<S: Stage>(State(state): State<Arc<AppState<S>>>) -> Json<SanitizedConfig> {
    Json(state.config.clone())
}
