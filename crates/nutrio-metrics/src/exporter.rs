//! Best-effort export of collected metrics to a Prometheus Pushgateway.
//!
//! The exporter starts out unavailable and only pushes after a probe has
//! succeeded. A failed probe or push pauses exporting, logs one warning for
//! the whole outage and arms a single retry timer that re-probes until the
//! gateway answers again. Nothing here returns an error to the caller.

use std::sync::{Arc, Mutex, MutexGuard};

use nutrio_common::error::NutrioError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    collector::MetricsCollector,
    config::MetricsConfig,
    error_handling::{record_connection_status, record_recovery},
    exposition::render_push_body,
    transport::{HttpTransport, PushTransport},
    types::Metric,
};

#[derive(Default)]
struct ConnectionState {
    available: bool,
    has_logged_error: bool,
    retry: Option<JoinHandle<()>>,
    destroyed: bool,
}

#[derive(Clone)]
pub struct PrometheusCollector {
    inner: Arc<Inner>,
}

struct Inner {
    config: MetricsConfig,
    base_url: Option<Url>,
    transport: Arc<dyn PushTransport>,
    collector: Arc<MetricsCollector>,
    state: Mutex<ConnectionState>,
}

impl PrometheusCollector {
    pub fn new(config: MetricsConfig, collector: Arc<MetricsCollector>) -> Self {
        let transport = Arc::new(HttpTransport::new(config.push_timeout));
        Self::with_transport(config, collector, transport)
    }

    pub fn with_transport(
        config: MetricsConfig,
        collector: Arc<MetricsCollector>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        let base_url = config
            .pushgateway_url
            .as_deref()
            .and_then(|raw| match Url::parse(raw) {
                Ok(url) => Some(url),
                Err(err) => {
                    warn!(url = raw, error = %err, "ignoring invalid pushgateway url");
                    None
                }
            });

        Self {
            inner: Arc::new(Inner {
                config,
                base_url,
                transport,
                collector,
                state: Mutex::new(ConnectionState::default()),
            }),
        }
    }

    /// Runs the first probe. Does nothing when exporting is disabled or no
    /// gateway is configured.
    pub async fn start(&self) {
        if !self.inner.push_enabled() {
            debug!("metrics push disabled; pushgateway probe skipped");
            return;
        }
        self.inner.check_connection().await;
    }

    /// Probes the gateway and updates availability. Returns the new state.
    pub async fn check_connection(&self) -> bool {
        self.inner.check_connection().await
    }

    pub async fn push_metric(&self, metric: &Metric) {
        self.push_metrics(std::slice::from_ref(metric), None).await;
    }

    /// Pushes `metrics` under `job`, or the configured job name.
    pub async fn push_metrics(&self, metrics: &[Metric], job: Option<&str>) {
        self.inner.push(metrics, job).await;
    }

    /// Pushes everything the shared collector currently holds.
    pub async fn push_all(&self) {
        let metrics = self.inner.collector.get_all_metrics();
        self.inner.push(&metrics, None).await;
    }

    /// Cancels the pending retry and stops all further probes and pushes.
    pub fn destroy(&self) {
        let mut state = self.inner.lock_state();
        state.destroyed = true;
        state.available = false;
        if let Some(handle) = state.retry.take() {
            handle.abort();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.push_enabled()
    }

    pub fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    pub fn has_logged_error(&self) -> bool {
        self.inner.lock_state().has_logged_error
    }

    pub fn has_pending_retry(&self) -> bool {
        self.inner
            .lock_state()
            .retry
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Inner {
    fn push_enabled(&self) -> bool {
        self.config.enabled && self.base_url.is_some()
    }

    fn is_available(&self) -> bool {
        let state = self.lock_state();
        state.available && !state.destroyed
    }

    fn is_destroyed(&self) -> bool {
        self.lock_state().destroyed
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push_url(&self, job: &str) -> Option<String> {
        let mut url = self.base_url.clone()?;
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(["metrics", "job", job]);
        Some(url.to_string())
    }

    async fn check_connection(self: &Arc<Self>) -> bool {
        if !self.push_enabled() || self.is_destroyed() {
            return false;
        }
        let Some(url) = self.base_url.as_ref().map(Url::to_string) else {
            return false;
        };

        let outcome = match self.transport.probe(&url).await {
            Ok(status) if is_reachable(status) => Ok(()),
            Ok(status) => Err(NutrioError::UnexpectedStatus {
                url: url.clone(),
                status,
            }),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                self.mark_available();
                true
            }
            Err(err) => {
                self.mark_unavailable(&err);
                false
            }
        }
    }

    async fn push(self: &Arc<Self>, metrics: &[Metric], job: Option<&str>) {
        if metrics.is_empty() || !self.push_enabled() || !self.is_available() {
            return;
        }

        let job = job.unwrap_or(&self.config.job_name);
        let Some(url) = self.push_url(job) else {
            debug!(job, "pushgateway url cannot carry a job path");
            return;
        };

        let body = render_push_body(metrics);
        match self.transport.push(&url, body).await {
            Ok(status) if (200..300).contains(&status) => {
                debug!(job, count = metrics.len(), "pushed metrics");
            }
            Ok(status) => self.mark_unavailable(&NutrioError::UnexpectedStatus { url, status }),
            Err(err) => self.mark_unavailable(&err),
        }
    }

    fn mark_available(&self) {
        let recovered = {
            let mut state = self.lock_state();
            if state.destroyed {
                return;
            }
            state.available = true;
            if let Some(handle) = state.retry.take() {
                handle.abort();
            }
            std::mem::replace(&mut state.has_logged_error, false)
        };

        record_connection_status(&self.collector, true);
        if recovered {
            info!(
                url = self.base_url.as_ref().map(Url::as_str).unwrap_or_default(),
                "pushgateway connection restored; metrics export resumed"
            );
            record_recovery(&self.collector);
        }
    }

    fn mark_unavailable(self: &Arc<Self>, err: &NutrioError) {
        let first_failure = {
            let mut state = self.lock_state();
            if state.destroyed {
                return;
            }
            state.available = false;
            let first_failure = !state.has_logged_error;
            state.has_logged_error = true;
            self.schedule_retry(&mut state);
            first_failure
        };

        record_connection_status(&self.collector, false);
        if first_failure {
            warn!(
                url = self.base_url.as_ref().map(Url::as_str).unwrap_or_default(),
                error = %err,
                retry_in_ms = self.config.retry_interval.as_millis() as u64,
                "pushgateway unavailable; metrics export paused"
            );
        } else {
            debug!(error = %err, "pushgateway still unavailable");
        }
    }

    /// Arms the retry timer unless one is already pending. The task holds a
    /// weak reference so dropping the exporter cancels it.
    fn schedule_retry(self: &Arc<Self>, state: &mut ConnectionState) {
        if state
            .retry
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }

        let weak = Arc::downgrade(self);
        let interval = self.config.retry_interval;
        state.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.lock_state().retry = None;
            inner.check_connection().await;
        }));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = state.retry.take() {
            handle.abort();
        }
    }
}

/// The gateway's root answers 404 to GET, which still proves it is reachable.
fn is_reachable(status: u16) -> bool {
    (200..300).contains(&status) || status == 404
}
