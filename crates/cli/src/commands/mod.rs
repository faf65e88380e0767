//! CLI subcommand implementations.

pub mod daemon;
pub mod doctor;
pub mod status;

use anyhow::Context;
use inquest_config::AppConfig;
use std::path::PathBuf;

/// Resolve the config path: explicit flag, else `~/.inquest/config.toml`.
fn config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| Some(AppConfig::default_path()).filter(|p| p.exists()))
}

/// Load configuration from file when present, env-only defaults otherwise.
pub(crate) fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    match config_path(explicit) {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => AppConfig::from_env().context("Failed to build config from environment"),
    }
}
