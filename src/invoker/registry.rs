//! Name-to-invocable lookup shared by every run

use super::types::{InvokeError, Invocable};
use super::{FnInvocable, create_invocable};
use crate::config::StepflowConfig;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct InvocableRegistry {
    invocables: HashMap<String, Arc<dyn Invocable>>,
}

impl std::fmt::Debug for InvocableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocableRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl InvocableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every enabled invocable in the config
    pub fn from_config(config: &StepflowConfig) -> Result<Self, InvokeError> {
        let mut registry = Self::new();
        for (name, invocable) in config.enabled_invocables() {
            registry.register(create_invocable(name, invocable)?);
        }
        Ok(registry)
    }

    /// Register under the invocable's own name, replacing any previous entry
    pub fn register(&mut self, invocable: Arc<dyn Invocable>) -> &mut Self {
        self.invocables
            .insert(invocable.name().to_string(), invocable);
        self
    }

    pub fn register_fn<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Value, InvokeError> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnInvocable::new(name, func)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Invocable>> {
        self.invocables.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.invocables.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.invocables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
