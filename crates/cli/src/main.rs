//! inquestd — the main entry point.
//!
//! Commands:
//! - `daemon`  — Start the tool-execution daemon
//! - `status`  — Show a running daemon's health and status
//! - `doctor`  — Diagnose configuration and backend reachability

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "inquestd",
    about = "inquest — confidence-gated tool-execution daemon",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config.toml (defaults to ~/.inquest/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Daemon {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show a running daemon's health and status
    Status,

    /// Diagnose configuration and backend reachability
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Daemon { port } => commands::daemon::run(cli.config, port).await?,
        Commands::Status => commands::status::run(cli.config).await?,
        Commands::Doctor => commands::doctor::run(cli.config).await?,
    }

    Ok(())
}
