//! Local command invocable

use super::types::{
    InvokeError, InvokeRequest, InvokeResponse, Invocable, parse_failure, parse_output,
};
use crate::config::{InvocableConfig, expand_path};
use crate::template::TemplateEngine;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Exit status shells use for "found but not executable"
const EXIT_NOT_PERMITTED: i32 = 126;

/// Runs a local command per invocation
///
/// Arguments are templates rendered against the payload. The payload is
/// also written to stdin as JSON. Stdout is the task output.
#[derive(Debug, Clone)]
pub struct CommandInvocable {
    name: String,
    command: String,
    args: Vec<String>,
    timeout: Duration,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    templates: TemplateEngine,
}

impl CommandInvocable {
    pub fn from_config(name: impl Into<String>, config: &InvocableConfig) -> Result<Self, InvokeError> {
        let working_dir = config
            .working_dir
            .as_deref()
            .map(expand_path)
            .transpose()
            .map_err(|e| InvokeError::Config {
                message: format!("{:#}", e),
            })?;

        Ok(Self {
            name: name.into(),
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout),
            working_dir,
            env: config
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            templates: TemplateEngine::new(),
        })
    }

    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(300),
            working_dir: None,
            env: Vec::new(),
            templates: TemplateEngine::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_command(&self, request: &InvokeRequest) -> Result<Command, InvokeError> {
        let args = self
            .args
            .iter()
            .map(|arg| self.templates.render(arg, &request.payload))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| InvokeError::failed(format!("rendering arguments: {}", e)))?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(cmd)
    }

    fn failure(&self, code: Option<i32>, stdout: &str, stderr: &str) -> InvokeError {
        if let Some((error, cause)) = parse_failure(stdout) {
            let cause = if cause.is_empty() {
                stderr.trim().to_string()
            } else {
                cause
            };
            return InvokeError::named(error, cause);
        }
        if code == Some(EXIT_NOT_PERMITTED) {
            return InvokeError::permission_denied(stderr.trim());
        }

        let detail = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        match code {
            Some(code) => InvokeError::failed(format!("'{}' exited {}: {}", self.command, code, detail)),
            None => InvokeError::failed(format!("'{}' killed by signal: {}", self.command, detail)),
        }
    }
}

#[async_trait]
impl Invocable for CommandInvocable {
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse, InvokeError> {
        let start = Instant::now();
        let timeout = request.timeout.unwrap_or(self.timeout);
        let mut cmd = self.build_command(request)?;

        tracing::debug!(invocable = %self.name, command = %self.command, args = ?self.args, "spawning");

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                InvokeError::permission_denied(format!("cannot execute '{}': {}", self.command, e))
            } else {
                InvokeError::Unavailable {
                    message: format!("failed to spawn '{}': {}", self.command, e),
                }
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let body = serde_json::to_vec(&request.payload).map_err(|e| InvokeError::Config {
                message: format!("payload is not serializable: {}", e),
            })?;
            // Commands that ignore stdin close it early; a broken pipe is fine
            tokio::spawn(async move {
                let _ = stdin.write_all(&body).await;
            });
        }

        // Dropping the future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(InvokeError::Unavailable {
                    message: format!("failed to wait for '{}': {}", self.command, e),
                });
            }
            Err(_) => return Err(InvokeError::timeout(start.elapsed())),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(
            invocable = %self.name,
            code = ?output.status.code(),
            stdout_bytes = output.stdout.len(),
            "command finished"
        );

        if output.status.success() {
            Ok(InvokeResponse::new(parse_output(&stdout), start.elapsed()))
        } else {
            Err(self.failure(output.status.code(), &stdout, &stderr))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh(script: &str) -> CommandInvocable {
        CommandInvocable::new("sh", "sh").with_args(vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn test_payload_on_stdin() {
        let invocable = CommandInvocable::new("cat", "cat");
        let request = InvokeRequest::new("Echo", json!({"dataset": "s3://data/train.csv"}));

        let response = invocable.invoke(&request).await.unwrap();
        assert_eq!(response.output, json!({"dataset": "s3://data/train.csv"}));
    }

    #[tokio::test]
    async fn test_args_rendered_from_payload() {
        let invocable = CommandInvocable::new("echo", "echo").with_args(vec!["{{ model }}".into()]);
        let request = InvokeRequest::new("Echo", json!({"model": "model-v2"}));

        let response = invocable.invoke(&request).await.unwrap();
        assert_eq!(response.output, json!("model-v2"));
    }

    #[tokio::test]
    async fn test_empty_output_is_null() {
        let response = sh("true")
            .invoke(&InvokeRequest::new("Noop", json!({})))
            .await
            .unwrap();
        assert_eq!(response.output, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_task_failure() {
        let result = sh("echo boom >&2; exit 3")
            .invoke(&InvokeRequest::new("Fail", json!({})))
            .await;
        match result {
            Err(InvokeError::Failed { error: None, message }) => {
                assert!(message.contains("exited 3"));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_structured_failure() {
        let result = sh(r#"echo '{"error": "QuotaExceeded", "cause": "too many jobs"}'; exit 1"#)
            .invoke(&InvokeRequest::new("Fail", json!({})))
            .await;
        let kind = result.unwrap_err().into_error_kind();
        assert_eq!(kind.name(), "QuotaExceeded");
        assert_eq!(kind.cause(), "too many jobs");
    }

    #[tokio::test]
    async fn test_exit_126_is_permission_denied() {
        let result = sh("exit 126")
            .invoke(&InvokeRequest::new("Fail", json!({})))
            .await;
        assert!(matches!(result, Err(InvokeError::PermissionDenied { .. })));
    }

    #[tokio::test]
    async fn test_timeout() {
        let invocable = CommandInvocable::new("sleep", "sleep")
            .with_args(vec!["10".into()])
            .with_timeout(Duration::from_millis(100));

        let result = invocable.invoke(&InvokeRequest::new("Slow", json!({}))).await;
        assert!(matches!(result, Err(InvokeError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_unavailable_command() {
        let invocable = CommandInvocable::new("missing", "definitely_not_a_real_command_12345");
        let result = invocable.invoke(&InvokeRequest::new("Missing", json!({}))).await;
        assert!(matches!(result, Err(InvokeError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_undefined_arg_fails() {
        let invocable = CommandInvocable::new("echo", "echo").with_args(vec!["{{ nope }}".into()]);
        let result = invocable.invoke(&InvokeRequest::new("Echo", json!({}))).await;
        assert!(matches!(result, Err(InvokeError::Failed { .. })));
    }

    #[test]
    fn test_from_config() {
        let config = InvocableConfig {
            command: "./train.sh".into(),
            args: vec!["--epochs".into(), "{{ epochs }}".into()],
            timeout: 60,
            ..Default::default()
        };

        let invocable = CommandInvocable::from_config("train", &config).unwrap();
        assert_eq!(invocable.name(), "train");
        assert_eq!(invocable.args.len(), 2);
        assert_eq!(invocable.default_timeout(), Some(Duration::from_secs(60)));
    }
}
