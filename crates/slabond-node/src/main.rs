//! SLABond Node — entry point.
//!
//! Starts the settlement node with configuration from a TOML file or defaults.

mod config;
mod node;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::NodeConfig;
use node::SlabondNode;

/// SLABond Node
#[derive(Parser, Debug)]
#[command(name = "slabond-node", version, about = "SLABond guarantee settlement node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "slabond.toml")]
    config: PathBuf,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the SLA sweep interval in seconds.
    #[arg(long)]
    sweep_interval: Option<u64>,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

fn init_tracing(config: &NodeConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.is_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Handle --init flag
    if args.init {
        let config = NodeConfig::default();
        init_tracing(&config);
        config.save(&args.config)?;
        tracing::info!(path = %args.config.display(), "wrote default config");
        return Ok(());
    }

    // Load configuration and apply CLI overrides
    let mut config = NodeConfig::load(&args.config)?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(interval) = args.sweep_interval {
        config.monitor.interval_secs = interval;
    }

    init_tracing(&config);
    tracing::info!("SLABond Node v{}", env!("CARGO_PKG_VERSION"));

    let mut node = SlabondNode::new(config)?;
    node.start().await?;

    // Set up graceful shutdown on SIGINT
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("received shutdown signal"),
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "node event loop error");
            }
        }
        _ = shutdown => {
            tracing::info!("initiating graceful shutdown");
        }
    }

    node.shutdown().await?;
    tracing::info!("SLABond node exited cleanly");
    Ok(())
}
