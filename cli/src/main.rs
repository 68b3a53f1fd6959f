//! chainsync CLI: follow a node into an in-memory index, broadcast
//! transactions.
//!
//! Usage:
//! ```bash
//! chainsync follow    --rpc-url http://127.0.0.1:8332 --rpc-user u --rpc-password p
//! chainsync follow    --config chainsync.json
//! chainsync broadcast --rpc-url http://127.0.0.1:8332 --hex 0200...
//! chainsync info
//! ```

mod config;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use chainsync_core::config::SyncConfigBuilder;
use chainsync_core::{ChainSync, SyncConfig, TransactionStore};
use chainsync_node::{FollowerConfig, HttpNodeFeed, RpcConfig, TipFollower};
use chainsync_storage::{MemoryBlockStore, MemoryTransactionStore};

use crate::config::FileConfig;
use crate::logging::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "chainsync", version, about = "Block-explorer chain sync and address indexer")]
struct Cli {
    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long, global = true, env = "CHAINSYNC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit JSON structured logs
    #[arg(long, global = true, env = "CHAINSYNC_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the node's tip and index it until interrupted
    Follow {
        #[command(flatten)]
        node: NodeArgs,

        /// JSON config file; flags override its values
        #[arg(long, env = "CHAINSYNC_CONFIG")]
        config: Option<PathBuf>,

        /// Poll interval in milliseconds
        #[arg(long, env = "CHAINSYNC_POLL_MS")]
        poll_ms: Option<u64>,

        /// Maximum blocks fetched when backfilling unknown ancestry
        #[arg(long, env = "CHAINSYNC_MAX_BACKFILL")]
        max_backfill: Option<usize>,

        /// Concurrent address updates per block
        #[arg(long, env = "CHAINSYNC_INDEX_CONCURRENCY")]
        index_concurrency: Option<usize>,

        /// Skip address indexing
        #[arg(long)]
        no_index: bool,
    },
    /// Broadcast a signed raw transaction
    Broadcast {
        #[command(flatten)]
        node: NodeArgs,

        /// Transaction in hex
        #[arg(long)]
        hex: String,
    },
    /// Show defaults
    Info,
}

#[derive(Args, Debug)]
struct NodeArgs {
    /// Node JSON-RPC endpoint [default: http://127.0.0.1:8332]
    #[arg(long, env = "CHAINSYNC_RPC_URL")]
    rpc_url: Option<String>,

    #[arg(long, env = "CHAINSYNC_RPC_USER")]
    rpc_user: Option<String>,

    #[arg(long, env = "CHAINSYNC_RPC_PASSWORD", hide_env_values = true)]
    rpc_password: Option<String>,
}

impl NodeArgs {
    /// Apply the flags on top of `base`.
    fn apply(self, base: Option<RpcConfig>) -> RpcConfig {
        let mut rpc = base.unwrap_or_else(|| RpcConfig::new(config::DEFAULT_RPC_URL));
        if let Some(url) = self.rpc_url {
            rpc.url = url;
        }
        if self.rpc_user.is_some() {
            rpc.user = self.rpc_user;
        }
        if self.rpc_password.is_some() {
            rpc.password = self.rpc_password;
        }
        rpc
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Loaded before the subscriber so its `log` section applies.
    let file = match &cli.command {
        Command::Follow {
            config: Some(path), ..
        } => FileConfig::load(path)?,
        _ => FileConfig::default(),
    };

    let mut log = file.log.clone();
    if let Some(level) = cli.log_level {
        log.level = level;
    }
    log.json |= cli.log_json;
    init_tracing(&log);

    match cli.command {
        Command::Follow {
            node,
            poll_ms,
            max_backfill,
            index_concurrency,
            no_index,
            ..
        } => {
            let mut sync = SyncConfigBuilder::from(file.sync);
            if let Some(n) = index_concurrency {
                sync = sync.index_concurrency(n);
            }
            if no_index {
                sync = sync.index_addresses(false);
            }

            let mut follower = file.follower;
            if let Some(ms) = poll_ms {
                follower.poll_interval_ms = ms;
            }
            if let Some(n) = max_backfill {
                follower.max_backfill = n;
            }

            cmd_follow(node.apply(file.rpc), sync.build(), follower).await
        }
        Command::Broadcast { node, hex } => cmd_broadcast(node.apply(None), &hex).await,
        Command::Info => {
            cmd_info();
            Ok(())
        }
    }
}

async fn cmd_follow(
    rpc: RpcConfig,
    config: SyncConfig,
    follower_config: FollowerConfig,
) -> anyhow::Result<()> {
    let feed = Arc::new(HttpNodeFeed::new(rpc).context("failed to create node client")?);
    let blocks = Arc::new(MemoryBlockStore::new());
    let txs = Arc::new(MemoryTransactionStore::new());
    let coin = config.coin;
    let sync = Arc::new(ChainSync::new(blocks.clone(), txs.clone(), config));

    tracing::info!(url = feed.client().url(), "Connecting to node");
    let mut follower = TipFollower::new(feed, sync, blocks.clone(), txs.clone(), follower_config);

    tokio::select! {
        _ = follower.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            tracing::info!("Shutting down");
        }
    }

    println!("{}", serde_json::to_string_pretty(follower.status())?);
    let ranking = txs.ranking().await?;
    println!("Indexed {} blocks, {} funded addresses", blocks.len(), ranking.len());
    for entry in ranking.iter().take(10) {
        println!(
            "  #{:<3} {} {:.8}",
            entry.index + 1,
            entry.address,
            entry.balance(coin)
        );
    }
    Ok(())
}

async fn cmd_broadcast(rpc: RpcConfig, hex: &str) -> anyhow::Result<()> {
    let feed = HttpNodeFeed::new(rpc).context("failed to create node client")?;
    let txid = feed.broadcast(hex.trim()).await?;
    println!("{txid}");
    Ok(())
}

fn cmd_info() {
    let sync = SyncConfig::default();
    let follower = FollowerConfig::default();
    println!("ChainSync v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default node endpoint: {}", config::DEFAULT_RPC_URL);
    println!("  Poll interval: {} ms", follower.poll_interval_ms);
    println!("  Max backfill: {} blocks", follower.max_backfill);
    println!("  Address indexing: {}", if sync.index_addresses { "on" } else { "off" });
    println!("  Index concurrency: {}", sync.index_concurrency);
    println!("  Satoshis per coin: {}", sync.coin);
    println!("  Storage backends: memory");
}
