//! Meridian node binary.

use clap::Parser;
use meridian_node::{Node, NodeConfig, NodeError};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Meridian ledger node.
#[derive(Parser, Debug)]
#[command(name = "meridian-node", version, about)]
struct Cli {
    /// Path to a JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable mining.
    #[arg(long)]
    mine: bool,

    /// Override the proof-of-work difficulty (leading zero bits).
    #[arg(long)]
    difficulty: Option<u64>,

    /// Override the block period in milliseconds.
    #[arg(long)]
    block_period_ms: Option<u64>,

    /// Override the executor pool size.
    #[arg(long)]
    executors: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), NodeError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    if cli.mine {
        config.mining = true;
    }
    if let Some(difficulty) = cli.difficulty {
        config.block_difficulty = difficulty;
    }
    if let Some(period) = cli.block_period_ms {
        config.block_period_ms = period;
    }
    if let Some(executors) = cli.executors {
        config.num_executors = executors;
    }

    info!(?config, "Starting Meridian node");

    let mut node = Node::build(config)?;
    node.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    node.stop().await?;
    Ok(())
}
