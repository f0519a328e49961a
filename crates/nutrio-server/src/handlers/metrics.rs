use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use nutrio_metrics::Labels;
use tracing::debug;

use crate::router::AppState;

const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

pub async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let payload = state.collector.render_prometheus();

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );

    response
}

pub async fn track_http_metrics(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let started_at = Instant::now();
    let method = request.method().as_str().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    let labels = Labels::new()
        .with("method", method)
        .with("route", route)
        .with("status", response.status().as_u16().to_string());

    let recorded = state
        .collector
        .counter(HTTP_REQUESTS_TOTAL, "HTTP requests served", &labels, 1.0)
        .and_then(|()| {
            state.collector.histogram(
                HTTP_REQUEST_DURATION_SECONDS,
                "HTTP request latency in seconds",
                started_at.elapsed().as_secs_f64(),
                &labels,
                None,
            )
        });
    if let Err(err) = recorded {
        debug!(error = %err, "failed to record request metrics");
    }

    response
}
