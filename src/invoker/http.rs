//! HTTP endpoint invocable

use super::types::{
    InvokeError, InvokeRequest, InvokeResponse, Invocable, parse_failure, parse_output,
};
use crate::config::InvocableConfig;
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// POSTs the payload as JSON to an endpoint
#[derive(Debug, Clone)]
pub struct HttpInvocable {
    name: String,
    url: String,

    /// Environment variable holding a bearer token
    token_env: Option<String>,

    timeout: Duration,
    client: reqwest::Client,
}

impl HttpInvocable {
    pub fn from_config(name: impl Into<String>, config: &InvocableConfig) -> Result<Self, InvokeError> {
        // For HTTP invocables, command is the URL
        let mut invocable = Self::new(name, &config.command)?;
        invocable.token_env = config.token_env.clone();
        invocable.timeout = Duration::from_secs(config.timeout);
        Ok(invocable)
    }

    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self, InvokeError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| InvokeError::Config {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            token_env: None,
            timeout: Duration::from_secs(300),
            client,
        })
    }

    pub fn with_token_env(mut self, var: impl Into<String>) -> Self {
        self.token_env = Some(var.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn token(&self) -> Option<String> {
        self.token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty())
    }

    /// Map a non-success HTTP status to an invoke error
    fn map_http_error(&self, status: reqwest::StatusCode, body: &str, elapsed: Duration) -> InvokeError {
        if let Some((error, cause)) = parse_failure(body) {
            return InvokeError::named(error, cause);
        }
        match status.as_u16() {
            401 | 403 => InvokeError::permission_denied(format!("HTTP {}: {}", status, body.trim())),
            408 | 504 => InvokeError::timeout(elapsed),
            _ => InvokeError::failed(format!("HTTP {}: {}", status, body.trim())),
        }
    }
}

#[async_trait]
impl Invocable for HttpInvocable {
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse, InvokeError> {
        let start = Instant::now();

        let mut http_request = self.client.post(&self.url).json(&request.payload);
        if let Some(token) = self.token() {
            http_request = http_request.bearer_auth(token);
        }

        tracing::debug!(invocable = %self.name, url = %self.url, "posting payload");

        let timeout = request.timeout.unwrap_or(self.timeout);
        let result = tokio::time::timeout(timeout, http_request.send()).await;
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(response)) => {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| InvokeError::Network {
                        message: format!("failed to read response: {}", e),
                    })?;

                if status.is_success() {
                    Ok(InvokeResponse::new(parse_output(&body), start.elapsed()))
                } else {
                    Err(self.map_http_error(status, &body, elapsed))
                }
            }
            Ok(Err(e)) => {
                if e.is_timeout() {
                    Err(InvokeError::timeout(elapsed))
                } else if e.is_connect() {
                    Err(InvokeError::Network {
                        message: format!("connection failed: {}", e),
                    })
                } else {
                    Err(InvokeError::Network {
                        message: format!("request failed: {}", e),
                    })
                }
            }
            Err(_) => Err(InvokeError::timeout(elapsed)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }
}
