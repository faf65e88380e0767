//! Backend registry — configured backends looked up by name.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use inquest_config::AppConfig;
use inquest_core::backend::Backend;
use inquest_core::error::BackendError;

use crate::openai_compat::OpenAiCompatBackend;

/// Name → backend handle map, fixed at daemon start.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self { backends: HashMap::new() }
    }

    /// Build every backend named in the configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();
        for (name, backend_config) in &config.backends {
            let api_key = backend_config.api_key.clone().unwrap_or_default();
            let mut backend = OpenAiCompatBackend::new(name.clone(), api_key);
            if let Some(url) = &backend_config.api_url {
                backend = backend.with_base_url(url.clone());
            }
            info!(backend = %name, "Configured backend");
            registry.register(Arc::new(backend));
        }
        registry
    }

    /// Register a backend. Replaces any existing backend with the same name.
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    /// Look up a backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(name).cloned()
    }

    /// Look up a backend, erroring when absent.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Backend>, BackendError> {
        self.get(name)
            .ok_or_else(|| BackendError::NotConfigured(format!("no backend named '{name}'")))
    }

    /// All configured backend names.
    pub fn names(&self) -> Vec<&str> {
        self.backends.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
