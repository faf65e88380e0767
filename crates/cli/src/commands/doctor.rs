//! `inquestd doctor` — diagnose configuration and backend reachability.

use std::path::PathBuf;

use inquest_backends::BackendRegistry;

pub async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    println!("✓ Configuration loads and validates");

    if config.backends.is_empty() {
        println!("✗ No backends configured — the daemon will refuse to start");
        return Ok(());
    }
    println!("✓ {} backend(s) configured", config.backends.len());

    if !config.backends.contains_key(&config.default_backend) {
        println!("✗ default_backend '{}' has no [backends.{}] section", config.default_backend, config.default_backend);
    }
    if config.expert.enabled && !config.backends.contains_key(&config.expert.backend) {
        println!("✗ expert.backend '{}' has no [backends.{}] section", config.expert.backend, config.expert.backend);
    }

    let registry = BackendRegistry::from_config(&config);
    for name in registry.names() {
        let Some(backend) = registry.get(name) else { continue };
        match backend.health_check().await {
            Ok(true) => println!("✓ backend '{name}' reachable"),
            Ok(false) => println!("✗ backend '{name}' responded unhealthy"),
            Err(e) => println!("✗ backend '{name}' unreachable: {e}"),
        }
    }

    Ok(())
}
