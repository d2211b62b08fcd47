//! Outbound integration calls.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::trace;

/// One outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<JsonValue>,
    pub timeout: Duration,
}

/// Raw response; the orchestrator decides what counts as success.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationResponse {
    pub status: u16,
    pub reason: Option<String>,
    pub body: String,
}

impl IntegrationResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport to integration endpoints.
#[async_trait]
pub trait IntegrationClient: Send + Sync {
    async fn send(&self, request: IntegrationRequest) -> Result<IntegrationResponse, ClientError>;
}

/// `reqwest`-backed client. Every call carries its own timeout.
#[derive(Debug, Clone, Default)]
pub struct HttpIntegrationClient {
    client: reqwest::Client,
}

impl HttpIntegrationClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IntegrationClient for HttpIntegrationClient {
    async fn send(&self, request: IntegrationRequest) -> Result<IntegrationResponse, ClientError> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| ClientError::InvalidMethod(request.method.clone()))?;

        trace!(method = %method, url = %request.url, "Sending integration request");

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, request.timeout))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::from_reqwest(e, request.timeout))?;

        Ok(IntegrationResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().map(String::from),
            body,
        })
    }
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),
}

impl ClientError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(timeout)
        } else {
            ClientError::Network(err.to_string())
        }
    }
}
