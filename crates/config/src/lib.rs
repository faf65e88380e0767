//! Configuration loading, validation, and management for inquest.
//!
//! Loads configuration from `~/.inquest/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// The root configuration structure.
///
/// Maps directly to `~/.inquest/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend used when a request doesn't name one.
    #[serde(default = "default_backend_name")]
    pub default_backend: String,

    /// Admission (concurrency limit) settings
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Request coalescer settings
    #[serde(default)]
    pub coalescer: CoalescerConfig,

    /// Workflow orchestration settings
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Expert analysis settings
    #[serde(default)]
    pub expert: ExpertConfig,

    /// Server (transport) settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Backend configurations, keyed by backend name
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
}

fn default_backend_name() -> String {
    "openai".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_backend: default_backend_name(),
            admission: AdmissionConfig::default(),
            coalescer: CoalescerConfig::default(),
            workflow: WorkflowConfig::default(),
            expert: ExpertConfig::default(),
            server: ServerConfig::default(),
            backends: HashMap::new(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("default_backend", &self.default_backend)
            .field("admission", &self.admission)
            .field("coalescer", &self.coalescer)
            .field("workflow", &self.workflow)
            .field("expert", &self.expert)
            .field("server", &self.server)
            .field("backends", &self.backends)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Global concurrency ceiling across all requests.
    #[serde(default = "default_global_capacity")]
    pub global_capacity: u32,

    /// Per-backend concurrency ceiling (unless overridden per backend).
    #[serde(default = "default_backend_capacity")]
    pub backend_capacity: u32,

    /// Per-session concurrency ceiling.
    #[serde(default = "default_session_capacity")]
    pub session_capacity: u32,

    /// How long an acquire may wait before failing with Exhausted.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,

    /// Leak-detection health check interval.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

fn default_global_capacity() -> u32 {
    24
}
fn default_backend_capacity() -> u32 {
    8
}
fn default_session_capacity() -> u32 {
    2
}
fn default_wait_timeout() -> u64 {
    30
}
fn default_health_interval() -> u64 {
    60
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            global_capacity: default_global_capacity(),
            backend_capacity: default_backend_capacity(),
            session_capacity: default_session_capacity(),
            wait_timeout_secs: default_wait_timeout(),
            health_interval_secs: default_health_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoalescerConfig {
    /// How long completed results remain servable from cache.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Maximum cached results before oldest are evicted.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_cache_ttl() -> u64 {
    90
}
fn default_cache_capacity() -> usize {
    256
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Overall deadline for one admitted request, including all steps.
    #[serde(default = "default_request_deadline")]
    pub request_deadline_secs: u64,

    /// Hard ceiling on the dynamic step limit, whatever the inputs say.
    #[serde(default = "default_max_step_limit")]
    pub max_step_limit: u32,
}

fn default_request_deadline() -> u64 {
    600
}
fn default_max_step_limit() -> u32 {
    24
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            request_deadline_secs: default_request_deadline(),
            max_step_limit: default_max_step_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertConfig {
    /// Whether to run expert analysis at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Build a structured message sequence (true) or a single formatted
    /// prompt (false). Evaluated once per dispatch.
    #[serde(default = "default_true")]
    pub use_messages_form: bool,

    /// Hard deadline on the expert analysis call.
    #[serde(default = "default_expert_timeout")]
    pub timeout_secs: u64,

    /// Which backend to dispatch expert analysis to.
    #[serde(default = "default_expert_backend")]
    pub backend: String,

    /// Which model to request.
    #[serde(default = "default_expert_model")]
    pub model: String,
}

fn default_true() -> bool {
    true
}
fn default_expert_timeout() -> u64 {
    180
}
fn default_expert_backend() -> String {
    "openai".into()
}
fn default_expert_model() -> String {
    "gpt-4o".into()
}

impl Default for ExpertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_messages_form: true,
            timeout_secs: default_expert_timeout(),
            backend: default_expert_backend(),
            model: default_expert_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8742
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct BackendConfig {
    /// API key for this backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override (e.g., for proxies or local servers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Default model for this backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Per-backend permit capacity override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply env overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus env overrides, for running without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables take precedence over file values.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("INQUEST_GLOBAL_CAPACITY") {
            if let Ok(n) = v.parse() {
                self.admission.global_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("INQUEST_WAIT_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.admission.wait_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("INQUEST_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("INQUEST_PORT") {
            if let Ok(n) = v.parse() {
                self.server.port = n;
            }
        }
        if let Ok(v) = std::env::var("INQUEST_EXPERT_ENABLED") {
            self.expert.enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        // Backend API keys: INQUEST_<NAME>_API_KEY
        let names: Vec<String> = self.backends.keys().cloned().collect();
        for name in names {
            let var = format!("INQUEST_{}_API_KEY", name.to_uppercase().replace('-', "_"));
            if let Ok(key) = std::env::var(&var) {
                if let Some(backend) = self.backends.get_mut(&name) {
                    backend.api_key = Some(key);
                }
            }
        }
    }

    /// Validate all settings. Called at startup; a daemon never runs with
    /// a configuration that fails here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admission.global_capacity == 0 {
            return Err(ConfigError::Invalid("admission.global_capacity must be > 0".into()));
        }
        if self.admission.backend_capacity == 0 {
            return Err(ConfigError::Invalid("admission.backend_capacity must be > 0".into()));
        }
        if self.admission.session_capacity == 0 {
            return Err(ConfigError::Invalid("admission.session_capacity must be > 0".into()));
        }
        if self.admission.backend_capacity > self.admission.global_capacity {
            return Err(ConfigError::Invalid(
                "admission.backend_capacity must not exceed admission.global_capacity".into(),
            ));
        }
        if self.workflow.max_step_limit == 0 {
            return Err(ConfigError::Invalid("workflow.max_step_limit must be > 0".into()));
        }
        if self.expert.timeout_secs == 0 {
            return Err(ConfigError::Invalid("expert.timeout_secs must be > 0".into()));
        }
        for (name, backend) in &self.backends {
            if let Some(capacity) = backend.capacity {
                if capacity == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "backends.{name}.capacity must be > 0"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> std::path::PathBuf {
        dirs_home().join(".inquest")
    }

    /// Default config file location (~/.inquest/config.toml).
    pub fn default_path() -> std::path::PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Effective permit capacity for a named backend.
    pub fn backend_capacity(&self, name: &str) -> u32 {
        self.backends
            .get(name)
            .and_then(|b| b.capacity)
            .unwrap_or(self.admission.backend_capacity)
    }
}

fn dirs_home() -> std::path::PathBuf {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");

    home.map(std::path::PathBuf::from).unwrap_or_else(|_| std::path::PathBuf::from("."))
}
