//! In-process closure invocable

use super::types::{InvokeError, InvokeRequest, InvokeResponse, Invocable};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

type InvokeFn = dyn Fn(&Value) -> Result<Value, InvokeError> + Send + Sync;

/// Wraps a closure as an invocable, for embedding the engine
#[derive(Clone)]
pub struct FnInvocable {
    name: String,
    func: Arc<InvokeFn>,
}

impl std::fmt::Debug for FnInvocable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInvocable").field("name", &self.name).finish()
    }
}

impl FnInvocable {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, InvokeError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl Invocable for FnInvocable {
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse, InvokeError> {
        let start = Instant::now();
        let output = (self.func)(&request.payload)?;
        Ok(InvokeResponse::new(output, start.elapsed()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_invocable() {
        let double = FnInvocable::new("double", |payload| {
            let n = payload["n"]
                .as_i64()
                .ok_or_else(|| InvokeError::failed("n must be an integer"))?;
            Ok(json!(n * 2))
        });

        let response = double
            .invoke(&InvokeRequest::new("Double", json!({"n": 21})))
            .await
            .unwrap();
        assert_eq!(response.output, json!(42));

        let err = double
            .invoke(&InvokeRequest::new("Double", json!({"n": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.into_error_kind().cause(), "n must be an integer");
    }
}
