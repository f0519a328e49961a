pub mod collector;
pub mod config;
pub mod error_handling;
pub mod exporter;
pub mod exposition;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use collector::MetricsCollector;
pub use config::MetricsConfig;
pub use error_handling::{ErrorHandlingMetrics, ErrorHandlingSummary};
pub use exporter::PrometheusCollector;
pub use transport::{HttpTransport, PushTransport};
pub use types::{HistogramOptions, HistogramValue, Labels, Metric, MetricType, MetricValue};
