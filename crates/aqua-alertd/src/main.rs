//! aqua-alertd - AquaGuard alert daemon
//!
//! Serves the alert dashboard API and runs the alert background workers.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use aqua_alertd::config::SAMPLE_CONFIG;
use aqua_alertd::{AlertdConfig, Daemon, LogFormat, LoggingConfig};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "aqua-alertd")]
#[command(about = "AquaGuard alert daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dashboard API and the alert workers
    Run {
        /// Path to config file (built-in defaults when absent)
        #[arg(short, long, env = "ALERTD_CONFIG")]
        config: Option<PathBuf>,

        /// Override the dashboard bind address
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "alertd.toml")]
        output: PathBuf,
    },

    /// Validate a config file and exit
    CheckConfig {
        /// Path to config file
        #[arg(short, long, env = "ALERTD_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, bind } => {
            run_daemon(config, bind).await?;
        }

        Commands::InitConfig { output } => {
            init_config(&output)?;
        }

        Commands::CheckConfig { config } => {
            check_config(&config)?;
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("invalid log filter")?;

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    Ok(())
}

async fn run_daemon(config_path: Option<PathBuf>, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => AlertdConfig::from_file(path)?,
        None => AlertdConfig::default(),
    };
    if let Some(bind) = bind {
        config.server.bind_addr = bind;
    }

    init_tracing(&config.logging)?;
    info!(
        config = ?config_path.as_deref().map(|p| p.display().to_string()),
        bind = %config.server.bind_addr,
        rules = config.rules.len(),
        "starting aqua-alertd"
    );

    let daemon = Daemon::build(config).await.context("failed to build daemon")?;

    if let Err(e) = daemon.run(shutdown_signal()).await {
        error!(error = %e, "dashboard server error");
        return Err(e.into());
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(output, SAMPLE_CONFIG)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("Config written to: {}", output.display());
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = AlertdConfig::from_file(path)?;

    println!("Config OK: {}", path.display());
    println!("  bind:     {}", config.server.bind_addr);
    println!("  policy:   {:?}", config.engine.transition_policy);
    println!("  rules:    {}", config.rules.len());
    Ok(())
}
