// ABOUTME: Health probe collaborator: does a success literal occur in a
// ABOUTME: response body. HTTP implementation backed by reqwest.

use crate::context::ProbeConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Fetch `url` and report whether `success_literal` occurs in the body.
    /// Transport problems count as a miss, not an error.
    async fn matches(&self, url: &str, success_literal: &str) -> Result<bool>;
}

pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| Error::Repository(format!("cannot build probe client: {e}")))?;
        Ok(HttpProbe { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn matches(&self, url: &str, success_literal: &str) -> Result<bool> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Problem with request: {e}");
                return Ok(false);
            }
        };
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Problem with request: {e}");
                return Ok(false);
            }
        };
        Ok(body.contains(success_literal))
    }
}
