//! Runtime error types for workflow runs

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Categories of errors a node can raise while a run is in progress
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    /// External invocable reported a failure
    #[error("task failed: {message}")]
    TaskFailed { message: String },

    #[error("timeout after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Authorization failure reported by an external invocable
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("path collision at {path}")]
    PathCollision { path: String },

    /// Named error raised by a Fail node or reported by an invocable
    #[error("{name}: {message}")]
    Custom { name: String, message: String },
}

impl ErrorKind {
    /// Name used by catch and retry patterns
    pub fn name(&self) -> &str {
        match self {
            ErrorKind::TaskFailed { .. } => "TaskFailed",
            ErrorKind::Timeout { .. } => "Timeout",
            ErrorKind::PermissionDenied { .. } => "PermissionDenied",
            ErrorKind::PathNotFound { .. } => "PathNotFound",
            ErrorKind::PathCollision { .. } => "PathCollision",
            ErrorKind::Custom { name, .. } => name,
        }
    }

    /// Human-readable cause, without the kind prefix
    pub fn cause(&self) -> String {
        match self {
            ErrorKind::TaskFailed { message }
            | ErrorKind::PermissionDenied { message }
            | ErrorKind::Custom { message, .. } => message.clone(),
            ErrorKind::Timeout { elapsed } => format!("timed out after {}ms", elapsed.as_millis()),
            ErrorKind::PathNotFound { path } => format!("path '{}' not found in context", path),
            ErrorKind::PathCollision { path } => {
                format!("path '{}' written by more than one branch", path)
            }
        }
    }

    /// Build an error from a kind name reported across the invocable seam
    pub fn from_name(name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match name {
            "TaskFailed" => ErrorKind::TaskFailed { message },
            "Timeout" => ErrorKind::Timeout {
                elapsed: Duration::ZERO,
            },
            "PermissionDenied" => ErrorKind::PermissionDenied { message },
            "PathNotFound" => ErrorKind::PathNotFound { path: message },
            "PathCollision" => ErrorKind::PathCollision { path: message },
            _ => ErrorKind::Custom {
                name: name.to_string(),
                message,
            },
        }
    }

    pub fn task_failed(message: impl Into<String>) -> Self {
        ErrorKind::TaskFailed {
            message: message.into(),
        }
    }
}

/// Full error context for a node failure
#[derive(Debug, Clone)]
pub struct NodeError {
    pub kind: ErrorKind,
    pub node: String,

    // Timing
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub failed_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,

    // Retry state
    pub attempt: u32,
    pub max_attempts: u32,
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node '{}' failed: {}", self.node, self.kind)?;
        if self.max_attempts > 1 {
            write!(f, " [attempt {}/{}]", self.attempt, self.max_attempts)?;
        }
        Ok(())
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl NodeError {
    pub fn new(kind: ErrorKind, node: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            kind,
            node: node.into(),
            started_at: now,
            failed_at: now,
            duration_ms: 0,
            attempt: 1,
            max_attempts: 1,
        }
    }

    pub fn with_timing(
        mut self,
        started_at: chrono::DateTime<chrono::Utc>,
        duration_ms: u64,
    ) -> Self {
        self.started_at = started_at;
        self.failed_at = chrono::Utc::now();
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_attempt(mut self, attempt: u32, max_attempts: u32) -> Self {
        self.attempt = attempt;
        self.max_attempts = max_attempts;
        self
    }

    /// Serializable summary of the error
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            error: self.kind.name().to_string(),
            cause: self.kind.cause(),
        }
    }
}

/// Error name and cause as recorded in run logs and catch result paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error: String,
    pub cause: String,
}
