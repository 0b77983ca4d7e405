//! Thin JSON-over-HTTP client for the backend services tools delegate to.

use std::time::Duration;

use anyhow::Context as _;
use serde_json::Value;
use tracing::debug;

use muse_core::config::ServiceEndpointConfig;

/// Response of a service call: HTTP status plus decoded body (`Null` if empty or not JSON).
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: Value,
}

impl ServiceResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Error text reported by the service, if any.
    pub fn error_text(&self) -> Option<String> {
        self.body
            .get("error")
            .or_else(|| self.body.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[derive(Clone)]
pub struct ServiceClient {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ServiceClient {
    pub fn new(config: &ServiceEndpointConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("building service HTTP client")?;
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("authorization", format!("Bearer {key}")),
            None => req,
        }
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> anyhow::Result<ServiceResponse> {
        let url = self.url(path);
        debug!(%url, "POST service");
        let resp = self.authorize(self.client.post(&url)).json(body).send().await?;
        Self::read(resp).await
    }

    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> anyhow::Result<ServiceResponse> {
        let url = self.url(path);
        debug!(%url, "GET service");
        let resp = self
            .authorize(self.client.get(&url))
            .query(query)
            .send()
            .await?;
        Self::read(resp).await
    }

    async fn read(resp: reqwest::Response) -> anyhow::Result<ServiceResponse> {
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Ok(ServiceResponse { status, body })
    }
}
