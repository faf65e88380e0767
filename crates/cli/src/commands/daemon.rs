//! `inquestd daemon` — start the tool-execution daemon.

use std::path::PathBuf;
use tracing::info;

pub async fn run(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = super::load_config(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }

    if config.backends.is_empty() {
        anyhow::bail!(
            "No backends configured. Add a [backends.<name>] section to {} \
             or run `inquestd doctor`.",
            inquest_config::AppConfig::default_path().display()
        );
    }

    info!(
        backends = config.backends.len(),
        global_capacity = config.admission.global_capacity,
        "Starting inquest daemon"
    );

    inquest_server::start(config).await.map_err(|e| anyhow::anyhow!(e.to_string()))
}
