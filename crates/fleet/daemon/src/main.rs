//! fleetd - Proxy-bound worker fleet daemon
//!
//! Serves the fleet control plane over REST and runs health monitoring,
//! auto-recovery and proxy rotation in the background.

use anyhow::Context;
use clap::Parser;
use fleet_daemon::{DaemonConfig, RuntimeKind, Server};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Fleet daemon CLI
#[derive(Parser)]
#[command(name = "fleetd")]
#[command(about = "Proxy-bound worker fleet daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FLEETD_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, env = "FLEETD_LISTEN_ADDR")]
    listen: Option<SocketAddr>,

    /// Log level
    #[arg(long, env = "FLEETD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "FLEETD_LOG_JSON")]
    json: bool,

    /// JSON safeguard policy file
    #[arg(long, env = "FLEETD_SAFEGUARDS")]
    safeguards: Option<PathBuf>,

    /// Container runtime
    #[arg(long, value_enum, env = "FLEETD_RUNTIME")]
    runtime: Option<RuntimeKind>,

    /// Fleet state file
    #[arg(long, env = "FLEETD_STATE_FILE")]
    state_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration, then override with CLI args
    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(path) = cli.safeguards {
        config.safeguards_file = Some(path);
    }
    if let Some(runtime) = cli.runtime {
        config.runtime = runtime;
    }
    if let Some(path) = cli.state_file {
        config.fleet.persistence.state_file = Some(path);
    }

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        runtime = ?config.runtime,
        "Starting fleetd"
    );

    let server = Server::new(config).context("failed to initialize fleet")?;
    server.run().await?;
    Ok(())
}
