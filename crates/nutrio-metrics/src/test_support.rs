use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use nutrio_common::error::{NutrioError, Result};
use tracing::{Event, Level, Subscriber, subscriber::DefaultGuard};
use tracing_subscriber::{
    Layer,
    layer::{Context, SubscriberExt},
};

use crate::{config::MetricsConfig, transport::PushTransport};

pub(crate) const GATEWAY_URL: &str = "http://pushgateway:9091";

pub(crate) fn gateway_config() -> MetricsConfig {
    MetricsConfig::default().with_pushgateway_url(GATEWAY_URL)
}

/// In-process stand-in for the Pushgateway.
pub(crate) struct FakeTransport {
    reachable: AtomicBool,
    probe_status: AtomicU16,
    push_status: AtomicU16,
    push_fails: AtomicBool,
    probes: AtomicUsize,
    pushes: Mutex<Vec<(String, String)>>,
}

impl FakeTransport {
    pub(crate) fn reachable() -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(true),
            probe_status: AtomicU16::new(200),
            push_status: AtomicU16::new(200),
            push_fails: AtomicBool::new(false),
            probes: AtomicUsize::new(0),
            pushes: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn unreachable() -> Arc<Self> {
        let transport = Self::reachable();
        transport.set_reachable(false);
        transport
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub(crate) fn set_probe_status(&self, status: u16) {
        self.probe_status.store(status, Ordering::SeqCst);
    }

    pub(crate) fn set_push_status(&self, status: u16) {
        self.push_status.store(status, Ordering::SeqCst);
    }

    pub(crate) fn fail_pushes(&self, fail: bool) {
        self.push_fails.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn push_count(&self) -> usize {
        self.pushes().len()
    }

    pub(crate) fn pushes(&self) -> Vec<(String, String)> {
        self.pushes.lock().map(|pushes| pushes.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn probe(&self, url: &str) -> Result<u16> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(NutrioError::Transport(format!("connection refused: {url}")));
        }
        Ok(self.probe_status.load(Ordering::SeqCst))
    }

    async fn push(&self, url: &str, body: String) -> Result<u16> {
        if let Ok(mut pushes) = self.pushes.lock() {
            pushes.push((url.to_string(), body));
        }
        if !self.reachable.load(Ordering::SeqCst) || self.push_fails.load(Ordering::SeqCst) {
            return Err(NutrioError::Transport(format!("connection reset: {url}")));
        }
        Ok(self.push_status.load(Ordering::SeqCst))
    }
}

/// Counts warn and info events emitted by the exporter.
#[derive(Clone, Default)]
pub(crate) struct LogCounter {
    warnings: Arc<AtomicUsize>,
    infos: Arc<AtomicUsize>,
}

impl LogCounter {
    pub(crate) fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub(crate) fn warnings(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }

    pub(crate) fn infos(&self) -> usize {
        self.infos.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for LogCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !metadata.target().starts_with("nutrio_metrics::exporter") {
            return;
        }

        match *metadata.level() {
            Level::WARN => {
                self.warnings.fetch_add(1, Ordering::SeqCst);
            }
            Level::INFO => {
                self.infos.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}
