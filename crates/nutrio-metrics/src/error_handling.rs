use std::{sync::Arc, time::Duration};

use nutrio_common::error::Result;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    collector::MetricsCollector,
    exporter::PrometheusCollector,
    types::{Labels, Metric},
};

pub const ERROR_HANDLING_JOB: &str = "error_handling_metrics";

pub const ABORT_ERRORS_TOTAL: &str = "abort_errors_total";
pub const RLS_VIOLATIONS_TOTAL: &str = "rls_violations_total";
pub const NETWORK_RETRIES_TOTAL: &str = "network_retries_total";
pub const NETWORK_RETRY_SUCCESS_TOTAL: &str = "network_retry_success_total";
pub const IMAGE_FALLBACK_TOTAL: &str = "image_fallback_total";
pub const PROMETHEUS_CONNECTION_STATUS: &str = "prometheus_connection_status";
pub const PROMETHEUS_RECOVERY_TOTAL: &str = "prometheus_recovery_total";

const METRIC_PREFIXES: [&str; 6] = [
    "abort_errors",
    "rls_violations",
    "network_retr",
    "image_fallback",
    "prometheus_connection",
    "prometheus_recovery",
];

const UNKNOWN: &str = "unknown";

/// Flat totals across every label set, for health checks and dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorHandlingSummary {
    pub abort_errors: f64,
    pub rls_violations: f64,
    pub network_retries: f64,
    pub network_retry_successes: f64,
    pub image_fallbacks: f64,
    pub prometheus_connected: bool,
    pub prometheus_recoveries: f64,
}

/// Error-handling counters for the application, pushed as their own job.
///
/// Tracking calls never fail: a rejected write is logged at debug level and
/// dropped.
#[derive(Clone)]
pub struct ErrorHandlingMetrics {
    collector: Arc<MetricsCollector>,
    exporter: PrometheusCollector,
}

impl ErrorHandlingMetrics {
    pub fn new(collector: Arc<MetricsCollector>, exporter: PrometheusCollector) -> Self {
        Self {
            collector,
            exporter,
        }
    }

    pub fn track_abort_error(&self, component: Option<&str>, operation: Option<&str>) {
        let labels = Labels::new()
            .with("component", label_or_unknown(component))
            .with("operation", label_or_unknown(operation));
        swallow(
            ABORT_ERRORS_TOTAL,
            self.collector.counter_inc(
                ABORT_ERRORS_TOTAL,
                "Requests aborted before completion",
                &labels,
            ),
        );
    }

    pub fn track_rls_violation(&self, table: Option<&str>, operation: Option<&str>) {
        let labels = Labels::new()
            .with("table", label_or_unknown(table))
            .with("operation", label_or_unknown(operation));
        swallow(
            RLS_VIOLATIONS_TOTAL,
            self.collector.counter_inc(
                RLS_VIOLATIONS_TOTAL,
                "Row-level security policy violations",
                &labels,
            ),
        );
    }

    pub fn track_network_retry(&self, operation: Option<&str>, attempt: u32, success: bool) {
        let operation = label_or_unknown(operation);
        let labels = Labels::new()
            .with("operation", operation)
            .with("attempt", attempt.to_string())
            .with("outcome", if success { "success" } else { "failure" });
        swallow(
            NETWORK_RETRIES_TOTAL,
            self.collector.counter_inc(
                NETWORK_RETRIES_TOTAL,
                "Network request retry attempts",
                &labels,
            ),
        );

        if success {
            swallow(
                NETWORK_RETRY_SUCCESS_TOTAL,
                self.collector.counter_inc(
                    NETWORK_RETRY_SUCCESS_TOTAL,
                    "Network requests that succeeded after a retry",
                    &Labels::new().with("operation", operation),
                ),
            );
        }
    }

    pub fn track_image_fallback(&self, source: Option<&str>, reason: Option<&str>) {
        let labels = Labels::new()
            .with("source", label_or_unknown(source))
            .with("reason", label_or_unknown(reason));
        swallow(
            IMAGE_FALLBACK_TOTAL,
            self.collector.counter_inc(
                IMAGE_FALLBACK_TOTAL,
                "Images replaced by a fallback",
                &labels,
            ),
        );
    }

    pub fn track_prometheus_connection(&self, connected: bool) {
        record_connection_status(&self.collector, connected);
    }

    pub fn track_prometheus_recovery(&self) {
        record_recovery(&self.collector);
    }

    pub fn summary(&self) -> ErrorHandlingSummary {
        let metrics = self.collector.get_all_metrics();
        ErrorHandlingSummary {
            abort_errors: total(&metrics, ABORT_ERRORS_TOTAL),
            rls_violations: total(&metrics, RLS_VIOLATIONS_TOTAL),
            network_retries: total(&metrics, NETWORK_RETRIES_TOTAL),
            network_retry_successes: total(&metrics, NETWORK_RETRY_SUCCESS_TOTAL),
            image_fallbacks: total(&metrics, IMAGE_FALLBACK_TOTAL),
            prometheus_connected: total(&metrics, PROMETHEUS_CONNECTION_STATUS) > 0.0,
            prometheus_recoveries: total(&metrics, PROMETHEUS_RECOVERY_TOTAL),
        }
    }

    /// Pushes this facade's series as one batch. Other metrics in the shared
    /// collector are left out.
    pub async fn push(&self) {
        let metrics = self
            .collector
            .get_all_metrics()
            .into_iter()
            .filter(|metric| is_error_handling_metric(&metric.name))
            .collect::<Vec<_>>();

        if metrics.is_empty() {
            return;
        }
        self.exporter
            .push_metrics(&metrics, Some(ERROR_HANDLING_JOB))
            .await;
    }

    pub fn spawn_flush_loop(&self, interval: Duration) -> JoinHandle<()> {
        let metrics = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                metrics.push().await;
            }
        })
    }

    pub fn exporter(&self) -> &PrometheusCollector {
        &self.exporter
    }
}

pub(crate) fn record_connection_status(collector: &MetricsCollector, connected: bool) {
    swallow(
        PROMETHEUS_CONNECTION_STATUS,
        collector.gauge(
            PROMETHEUS_CONNECTION_STATUS,
            "Whether the pushgateway is reachable (1) or not (0)",
            if connected { 1.0 } else { 0.0 },
            &Labels::new(),
        ),
    );
}

pub(crate) fn record_recovery(collector: &MetricsCollector) {
    swallow(
        PROMETHEUS_RECOVERY_TOTAL,
        collector.counter_inc(
            PROMETHEUS_RECOVERY_TOTAL,
            "Pushgateway connections restored after an outage",
            &Labels::new(),
        ),
    );
}

pub fn is_error_handling_metric(name: &str) -> bool {
    METRIC_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

fn label_or_unknown(value: Option<&str>) -> &str {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN)
}

fn total(metrics: &[Metric], name: &str) -> f64 {
    metrics
        .iter()
        .filter(|metric| metric.name == name)
        .filter_map(Metric::scalar)
        .sum()
}

fn swallow(name: &str, result: Result<()>) {
    if let Err(err) = result {
        debug!(metric = name, error = %err, "dropped error-handling metric update");
    }
}
