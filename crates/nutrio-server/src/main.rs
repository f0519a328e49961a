mod handlers;
mod router;

use std::{sync::Arc, time::Duration};

use clap::Parser;
use nutrio_metrics::{ErrorHandlingMetrics, MetricsCollector, MetricsConfig, PrometheusCollector};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::router::{AppState, app_router};

#[derive(Parser)]
#[command(name = "nutrio", about = "Nutrio telemetry service")]
struct Cli {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value = "8080")]
    port: u16,

    /// Overrides NUTRIO_METRICS_ENABLED.
    #[arg(long)]
    metrics_enabled: Option<bool>,

    /// Overrides NUTRIO_PUSHGATEWAY_URL.
    #[arg(long)]
    pushgateway_url: Option<String>,

    /// Overrides NUTRIO_METRICS_RETRY_INTERVAL_MS.
    #[arg(long)]
    retry_interval_ms: Option<u64>,

    #[arg(long, default_value_t = 30)]
    flush_interval_secs: u64,
}

impl Cli {
    fn metrics_config(&self) -> nutrio_common::Result<MetricsConfig> {
        let mut config = MetricsConfig::from_env()?;
        if let Some(enabled) = self.metrics_enabled {
            config.enabled = enabled;
        }
        if let Some(url) = self.pushgateway_url.as_deref() {
            config = config.with_pushgateway_url(url);
        }
        if let Some(interval) = self.retry_interval_ms {
            config = config.with_retry_interval(Duration::from_millis(interval));
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::from_default_env().add_directive("nutrio=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let addr = format!("{}:{}", cli.host, cli.port);
    let config = cli.metrics_config()?;
    let push_enabled = config.push_enabled();

    let collector = Arc::new(MetricsCollector::new());
    let exporter = PrometheusCollector::new(config, Arc::clone(&collector));
    exporter.start().await;
    let error_metrics = ErrorHandlingMetrics::new(Arc::clone(&collector), exporter.clone());

    let flush_interval = Duration::from_secs(cli.flush_interval_secs.max(1));
    let error_flush = error_metrics.spawn_flush_loop(flush_interval);
    let app_exporter = exporter.clone();
    let app_flush = tokio::spawn(async move {
        let mut interval = tokio::time::interval(flush_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            app_exporter.push_all().await;
        }
    });
    info!(push_enabled, interval_secs = flush_interval.as_secs(), "metrics flush enabled");

    let app = app_router(Arc::new(AppState::new(collector, error_metrics)));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("nutrio server listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app_flush.abort();
    error_flush.abort();
    exporter.push_all().await;
    exporter.destroy();
    info!("nutrio server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
