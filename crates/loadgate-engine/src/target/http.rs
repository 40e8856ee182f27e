//! HTTP implementation of [`TargetClient`]

use super::{TargetClient, TargetResponse};
use crate::error::TargetError;
use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use std::time::Duration;

/// reqwest-backed target client.
///
/// Redirects are never followed so the redirect scenario can observe the 302.
#[derive(Debug, Clone)]
pub struct HttpTarget {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTarget {
    /// Build a client for `base_url` with a per-request `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TargetError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .user_agent(concat!("loadgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TargetError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify(&self, error: reqwest::Error) -> TargetError {
        if error.is_timeout() {
            TargetError::Timeout(self.timeout)
        } else {
            TargetError::Transport(error.to_string())
        }
    }

    async fn read(&self, response: reqwest::Response) -> Result<TargetResponse, TargetError> {
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| self.classify(e))?;

        Ok(TargetResponse {
            status,
            location,
            body,
        })
    }
}

#[async_trait]
impl TargetClient for HttpTarget {
    async fn create(&self, original_url: &str) -> Result<TargetResponse, TargetError> {
        let response = self
            .client
            .post(format!("{}/api/links", self.base_url))
            .json(&serde_json::json!({ "original_url": original_url }))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        self.read(response).await
    }

    async fn resolve(&self, code: &str) -> Result<TargetResponse, TargetError> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, code))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        self.read(response).await
    }
}
