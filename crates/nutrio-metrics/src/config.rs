use std::time::Duration;

use nutrio_common::error::{NutrioError, Result};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_JOB_NAME: &str = "app_metrics";

pub const ENV_ENABLED: &str = "NUTRIO_METRICS_ENABLED";
pub const ENV_PUSHGATEWAY_URL: &str = "NUTRIO_PUSHGATEWAY_URL";
pub const ENV_RETRY_INTERVAL_MS: &str = "NUTRIO_METRICS_RETRY_INTERVAL_MS";
pub const ENV_JOB_NAME: &str = "NUTRIO_METRICS_JOB";
pub const ENV_PUSH_TIMEOUT_MS: &str = "NUTRIO_METRICS_PUSH_TIMEOUT_MS";

/// Settings for exporting metrics to a Pushgateway.
///
/// Pushing happens only when `enabled` is set and a gateway URL is present.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub pushgateway_url: Option<String>,
    pub retry_interval: Duration,
    pub job_name: String,
    pub push_timeout: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pushgateway_url: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            job_name: DEFAULT_JOB_NAME.to_string(),
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }
}

impl MetricsConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(enabled) = value(ENV_ENABLED) {
            config.enabled = parse_bool(ENV_ENABLED, &enabled)?;
        }
        config.pushgateway_url = value(ENV_PUSHGATEWAY_URL).map(|url| normalize_url(&url));
        if let Some(interval) = value(ENV_RETRY_INTERVAL_MS) {
            config.retry_interval = parse_millis(ENV_RETRY_INTERVAL_MS, &interval)?;
        }
        if let Some(job) = value(ENV_JOB_NAME) {
            config.job_name = job;
        }
        if let Some(timeout) = value(ENV_PUSH_TIMEOUT_MS) {
            config.push_timeout = parse_millis(ENV_PUSH_TIMEOUT_MS, &timeout)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_pushgateway_url(mut self, url: impl AsRef<str>) -> Self {
        let url = url.as_ref().trim();
        self.pushgateway_url = (!url.is_empty()).then(|| normalize_url(url));
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// True when metrics would actually leave the process.
    pub fn push_enabled(&self) -> bool {
        self.enabled && self.pushgateway_url.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_interval.is_zero() {
            return Err(NutrioError::InvalidArgument(
                "metrics retry interval must be positive".to_string(),
            ));
        }

        if self.job_name.is_empty() || self.job_name.contains('/') {
            return Err(NutrioError::InvalidArgument(format!(
                "invalid metrics job name: {:?}",
                self.job_name
            )));
        }

        if let Some(raw) = self.pushgateway_url.as_deref() {
            let url = url::Url::parse(raw).map_err(|err| {
                NutrioError::InvalidArgument(format!("invalid pushgateway url {raw}: {err}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(NutrioError::InvalidArgument(format!(
                    "pushgateway url must use http or https: {raw}"
                )));
            }
        }

        Ok(())
    }
}

pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(NutrioError::InvalidArgument(format!(
            "{key} must be a boolean, got {value:?}"
        ))),
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|err| NutrioError::InvalidArgument(format!("{key} must be milliseconds: {err}")))
}
