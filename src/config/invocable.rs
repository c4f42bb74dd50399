//! Configuration for external invocables (jobs and functions)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration for a single external invocable
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InvocableConfig {
    /// Command to execute (or HTTP URL for endpoint invocables)
    pub command: String,

    /// Arguments to pass to the command (templated against the payload)
    #[serde(default)]
    pub args: Vec<String>,

    /// Whether this invocable is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Working directory for commands
    pub working_dir: Option<String>,

    /// Environment variable holding a bearer token (HTTP invocables)
    pub token_env: Option<String>,

    /// Additional environment variables for the command
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    300 // 5 minutes
}

impl Default for InvocableConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            enabled: true,
            timeout: default_timeout(),
            working_dir: None,
            token_env: None,
            env: HashMap::new(),
            description: String::new(),
        }
    }
}

impl InvocableConfig {
    /// Returns true if this is an HTTP endpoint (URL starts with http)
    pub fn is_http(&self) -> bool {
        self.command.starts_with("http://") || self.command.starts_with("https://")
    }

    /// Returns true if this runs a local command
    pub fn is_command(&self) -> bool {
        !self.is_http()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            command = "./jobs/train.sh"
        "#;
        let config: InvocableConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.command, "./jobs/train.sh");
        assert!(config.enabled);
        assert_eq!(config.timeout, 300);
        assert!(config.is_command());
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            command = "python"
            args = ["jobs/evaluate.py", "--model", "{{ model.uri }}"]
            enabled = true
            timeout = 60
            working_dir = "~/pipelines"
            description = "Evaluate a trained model"

            [env]
            STAGE = "prod"
        "#;
        let config: InvocableConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.args.len(), 3);
        assert_eq!(config.timeout, 60);
        assert_eq!(config.working_dir, Some("~/pipelines".into()));
        assert_eq!(config.env.get("STAGE"), Some(&"prod".to_string()));
    }

    #[test]
    fn test_is_http() {
        let config = InvocableConfig {
            command: "https://jobs.internal/v1/train".into(),
            token_env: Some("JOBS_TOKEN".into()),
            ..Default::default()
        };
        assert!(config.is_http());
        assert!(!config.is_command());
    }
}
