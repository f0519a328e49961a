use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use nutrio_metrics::{ErrorHandlingMetrics, MetricsCollector};
use tower_http::trace::TraceLayer;

use crate::handlers;

pub struct AppState {
    pub collector: Arc<MetricsCollector>,
    pub error_metrics: ErrorHandlingMetrics,
}

impl AppState {
    pub fn new(collector: Arc<MetricsCollector>, error_metrics: ErrorHandlingMetrics) -> Self {
        Self {
            collector,
            error_metrics,
        }
    }
}

pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health/live", get(handlers::health::health_live))
        .route("/health/metrics", get(handlers::health::health_metrics))
        .route("/metrics", get(handlers::metrics::prometheus_metrics))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            handlers::metrics::track_http_metrics,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
