//! HTTP API for the document pipeline.
//!
//! - Health and Prometheus metrics
//! - Processing entry points (upload, re-run, status)
//! - Document listing, lookup and deletion

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::DocumentService;

pub mod documents;
use documents::{
    delete_document_handler, get_document_handler, list_documents_handler,
    process_document_handler, process_status_handler, upload_and_process_handler,
};

/// Room for multipart framing on top of the file itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state
pub struct AppState {
    pub service: Arc<DocumentService>,
    pub start_time: Instant,
    pub metrics: Option<PrometheusHandle>,
}

/// Build the API router
pub fn router(service: Arc<DocumentService>, metrics: Option<PrometheusHandle>) -> Router {
    let max_body_size =
        service.config.limits.max_document_size_bytes as usize + MULTIPART_OVERHEAD_BYTES;

    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
        metrics,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/process",
            post(upload_and_process_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/process/{id}", post(process_document_handler))
        .route("/process/{id}/status", get(process_status_handler))
        .route("/documents", get(list_documents_handler))
        .route(
            "/documents/{id}",
            get(get_document_handler).delete(delete_document_handler),
        );

    Router::new()
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "docpipe",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        in_flight: state.service.in_flight(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    in_flight: usize,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
