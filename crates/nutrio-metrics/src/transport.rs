use std::time::Duration;

use async_trait::async_trait;
use nutrio_common::error::{NutrioError, Result};
use reqwest::header::CONTENT_TYPE;

/// HTTP seam between the exporter and the Pushgateway.
///
/// Both calls return the response status; only transport-level failures are
/// errors. Interpreting the status is up to the caller.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn probe(&self, url: &str) -> Result<u16>;
    async fn push(&self, url: &str, body: String) -> Result<u16>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl PushTransport for HttpTransport {
    async fn probe(&self, url: &str) -> Result<u16> {
        let response = self.client.get(url).send().await.map_err(|err| {
            NutrioError::Transport(format!("failed to reach pushgateway at {url}: {err}"))
        })?;
        Ok(response.status().as_u16())
    }

    async fn push(&self, url: &str, body: String) -> Result<u16> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await
            .map_err(|err| {
                NutrioError::Transport(format!("failed to push metrics to {url}: {err}"))
            })?;
        Ok(response.status().as_u16())
    }
}
