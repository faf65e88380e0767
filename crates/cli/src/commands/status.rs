//! `inquestd status` — poll a running daemon's health and status surfaces.

use std::path::PathBuf;

pub async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let base = format!("http://{}:{}", config.server.host, config.server.port);
    let client = reqwest::Client::new();

    let status: serde_json::Value = client
        .get(format!("{base}/v1/status"))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Daemon unreachable at {base}: {e}"))?
        .json()
        .await?;

    println!("inquestd {} — up {}s", status["version"], status["uptime_secs"]);
    println!(
        "tools: {}",
        status["tools"]
            .as_array()
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| t["name"].as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default()
    );
    println!("active sessions: {}", status["active_sessions"]);

    let health: serde_json::Value = client.get(format!("{base}/v1/health")).send().await?.json().await?;

    print_pool("global", &health["global"]);
    if let Some(backends) = health["backends"].as_object() {
        for (name, pool) in backends {
            print_pool(&format!("backend:{name}"), pool);
        }
    }

    Ok(())
}

fn print_pool(name: &str, pool: &serde_json::Value) {
    println!(
        "{name}: {} — {}/{} permits free ({:.0}% utilized)",
        pool["status"].as_str().unwrap_or("unknown"),
        pool["current"],
        pool["expected"],
        pool["utilization"].as_f64().unwrap_or(0.0) * 100.0
    );
}
