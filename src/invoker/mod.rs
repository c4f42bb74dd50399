//! External invocables
//!
//! Task nodes hand a resolved JSON payload to an [`Invocable`] and get a
//! JSON value or a structured failure back. Adapters run local commands,
//! call HTTP endpoints, or wrap in-process closures.
//!
//! # Example
//!
//! ```ignore
//! use stepflow::invoker::{CommandInvocable, Invocable, InvokeRequest};
//!
//! let train = CommandInvocable::new("train", "./train.sh")
//!     .with_args(vec!["--epochs".into(), "{{ epochs }}".into()]);
//!
//! let request = InvokeRequest::new("Train", json!({"epochs": 10}));
//! let response = train.invoke(&request).await?;
//! println!("output: {}", response.output);
//! ```

mod command;
mod function;
mod http;
mod registry;
mod types;

pub use command::CommandInvocable;
pub use function::FnInvocable;
pub use http::HttpInvocable;
pub use registry::InvocableRegistry;
#[allow(unused_imports)]
pub use types::{InvokeError, InvokeRequest, InvokeResponse, Invocable, parse_output};

use crate::config::InvocableConfig;
use std::sync::Arc;

/// Create the adapter matching an invocable config
pub fn create_invocable(
    name: &str,
    config: &InvocableConfig,
) -> Result<Arc<dyn Invocable>, InvokeError> {
    if config.is_http() {
        Ok(Arc::new(HttpInvocable::from_config(name, config)?))
    } else {
        Ok(Arc::new(CommandInvocable::from_config(name, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_command_invocable() {
        let config = InvocableConfig {
            command: "./train.sh".into(),
            ..Default::default()
        };
        let invocable = create_invocable("train", &config).unwrap();
        assert_eq!(invocable.name(), "train");
    }

    #[test]
    fn test_create_http_invocable() {
        let config = InvocableConfig {
            command: "https://jobs.example.com/evaluate".into(),
            timeout: 30,
            ..Default::default()
        };
        let invocable = create_invocable("evaluate", &config).unwrap();
        assert_eq!(invocable.name(), "evaluate");
        assert_eq!(
            invocable.default_timeout(),
            Some(std::time::Duration::from_secs(30))
        );
    }
}
