//! L2 Sequencer
//!
//! Main entry point for the burn-to-mint rollup sequencer.
//! Follows L1 through an event feed, mints confirmed burns, seals L2 blocks
//! and settles fraud proofs. State is persisted to disk and survives restarts.

use anyhow::Result;
use clap::Parser;
use l1_integration::ChainId;
use l2_runtime::PersistentStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod feed;
mod node;

use config::NodeConfig;
use feed::JsonLinesSource;
use node::SequencerNode;

/// L2 burn-to-mint rollup sequencer
#[derive(Parser, Debug)]
#[command(name = "l2-sequencer")]
#[command(about = "Burn-to-mint rollup sequencer", long_about = None)]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for persistent state
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// JSON-lines event feed, `-` for stdin
    #[arg(long, default_value = "-")]
    feed: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Save state every N L1 blocks (0 = only on shutdown)
    #[arg(long, default_value = "100")]
    save_interval: u64,

    /// Seconds between timeout sweeps
    #[arg(long, default_value = "5")]
    tick_secs: u64,

    /// L2 chain id burns must target
    #[arg(long)]
    chain_id: Option<ChainId>,

    /// Transactions per checkpoint in execution traces
    #[arg(long)]
    trace_step_size: Option<usize>,

    /// Seconds a burn may wait for a confirmation quorum
    #[arg(long)]
    confirmation_window: Option<u64>,
}

impl Args {
    fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        if let Some(chain_id) = self.chain_id {
            config = config.with_chain_id(chain_id);
        }
        if let Some(step) = self.trace_step_size {
            config.state.trace_step_size = step;
        }
        if let Some(window) = self.confirmation_window {
            config.consensus.confirmation_window_secs = window;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.node_config()?;

    tracing::info!("Starting L2 sequencer");
    tracing::info!("  Chain id: {}", config.chain_id);
    tracing::info!("  Sequencers: {}", config.sequencers.len());
    tracing::info!("  Data directory: {:?}", args.data_dir);
    tracing::info!("  Feed: {}", args.feed);
    tracing::info!("  Save interval: {} L1 blocks", args.save_interval);

    // Create data directory if it doesn't exist
    std::fs::create_dir_all(&args.data_dir)?;
    let store = Arc::new(PersistentStore::open(&args.data_dir)?);

    let mut node = SequencerNode::open(config, store)?;
    tracing::info!(
        "State ready at L2 block {}, root {}",
        node.state().block_number(),
        node.state().state_root()
    );

    let tick = Duration::from_secs(args.tick_secs.max(1));
    if args.feed == "-" {
        node.run(JsonLinesSource::stdin(), args.save_interval, tick).await?;
    } else {
        let source = JsonLinesSource::open(Path::new(&args.feed)).await?;
        node.run(source, args.save_interval, tick).await?;
    }

    let withdrawals = node.challenges().stats();
    tracing::info!(
        "Sequencer stopped at L2 block {} on chain {}: {} withdrawals pending, {} ready",
        node.state().block_number(),
        node.config().chain_id,
        withdrawals.pending_withdrawals,
        withdrawals.ready_withdrawals
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "l2-sequencer",
            "--chain-id",
            "9",
            "--trace-step-size",
            "4",
            "--confirmation-window",
            "30",
        ]);
        let config = args.node_config().unwrap();

        assert_eq!(config.chain_id, 9);
        assert_eq!(config.burns.chain_id, 9);
        assert_eq!(config.fraud.chain_id, 9);
        assert_eq!(config.state.trace_step_size, 4);
        assert_eq!(config.consensus.confirmation_window_secs, 30);
        assert_eq!(args.feed, "-");
    }
}
