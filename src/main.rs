use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kiln_runtime::config::KilnConfig;
use kiln_runtime::logging::init_logging;

mod commands;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Kiln - local inference control plane")]
#[command(version)]
struct Cli {
    /// Path to kiln.toml
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot services, start the health guardian and serve the HTTP API
    Up,
    /// Show the status of a running control plane
    Status {
        /// Base URL of the running instance (defaults to the configured address)
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the model registry
    Models,
    /// Validate configuration and check the local engine
    Doctor,
}

/// Default config location when `--config` is not given
fn default_config_path() -> Option<PathBuf> {
    ["kiln.toml", "config/kiln.toml"]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: failed to read .env: {}", e);
        }
    }

    let cli = Cli::parse();
    let config_path = cli.config.or_else(default_config_path);

    // Doctor reports configuration problems itself instead of aborting.
    if let Commands::Doctor = cli.command {
        let ok = commands::doctor::run(config_path.as_deref()).await;
        if !ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    let config = KilnConfig::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("loading configuration from {}", path.display()),
        None => "loading default configuration".to_string(),
    })?;

    match cli.command {
        Commands::Up => {
            init_logging(&config.logging).context("initialising logging")?;
            commands::up::run(config).await
        }
        Commands::Status { url } => commands::status::run(&config, url).await,
        Commands::Models => commands::models::run(&config),
        Commands::Doctor => Ok(()),
    }
}
