//! Core types and traits for the external invocable seam

use crate::config::ErrorKind;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failures reported across the invocable seam
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    #[error("timeout after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Authorization failure
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// The invocable ran and reported a failure, optionally naming its kind
    #[error("{}: {message}", .error.as_deref().unwrap_or("failed"))]
    Failed {
        error: Option<String>,
        message: String,
    },

    /// Invocable could not be started
    #[error("invocable unavailable: {message}")]
    Unavailable { message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl InvokeError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            error: None,
            message: message.into(),
        }
    }

    /// Failure with a named error kind
    pub fn named(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            error: Some(error.into()),
            message: message.into(),
        }
    }

    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Map onto the runtime error taxonomy
    pub fn into_error_kind(self) -> ErrorKind {
        match self {
            InvokeError::Timeout { elapsed } => ErrorKind::Timeout { elapsed },
            InvokeError::PermissionDenied { message } => ErrorKind::PermissionDenied { message },
            InvokeError::Failed {
                error: Some(name),
                message,
            } => ErrorKind::from_name(&name, message),
            InvokeError::Failed {
                error: None,
                message,
            } => ErrorKind::TaskFailed { message },
            other @ (InvokeError::Unavailable { .. }
            | InvokeError::Network { .. }
            | InvokeError::Config { .. }) => ErrorKind::task_failed(other.to_string()),
        }
    }
}

/// A resolved payload on its way to an invocable
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Node that issued the request
    pub node: String,

    pub payload: Value,

    /// Override timeout for this request
    pub timeout: Option<Duration>,
}

impl InvokeRequest {
    pub fn new(node: impl Into<String>, payload: Value) -> Self {
        Self {
            node: node.into(),
            payload,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Successful invocation result
#[derive(Debug, Clone)]
pub struct InvokeResponse {
    pub output: Value,
    pub duration: Duration,
}

impl InvokeResponse {
    pub fn new(output: Value, duration: Duration) -> Self {
        Self { output, duration }
    }
}

/// Something outside the engine that does work for a task node
#[async_trait]
pub trait Invocable: Send + Sync {
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse, InvokeError>;

    fn name(&self) -> &str;

    /// Timeout used when the task sets none
    fn default_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Parse invocable output: JSON if possible, else trimmed text, empty is null
pub fn parse_output(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

/// Extract a structured `{ "error": ..., "cause": ... }` failure report
pub fn parse_failure(text: &str) -> Option<(String, String)> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    let error = value.get("error")?.as_str()?.to_string();
    let cause = value
        .get("cause")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((error, cause))
}
