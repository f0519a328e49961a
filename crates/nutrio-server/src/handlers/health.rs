use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use nutrio_metrics::ErrorHandlingSummary;
use serde::Serialize;

use crate::router::AppState;

pub async fn health_live() -> impl IntoResponse {
    StatusCode::OK
}

/// Telemetry is best-effort, so an unreachable gateway still reports 200.
pub async fn health_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let exporter = state.error_metrics.exporter();

    Json(MetricsHealthResponse {
        push_enabled: exporter.is_enabled(),
        gateway_available: exporter.is_available(),
        retry_pending: exporter.has_pending_retry(),
        series: state.collector.len(),
        error_handling: state.error_metrics.summary(),
    })
}

#[derive(Serialize)]
struct MetricsHealthResponse {
    push_enabled: bool,
    gateway_available: bool,
    retry_pending: bool,
    series: usize,
    error_handling: ErrorHandlingSummary,
}
