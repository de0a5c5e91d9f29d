//! Ghyll full node binary.
//!
//! Runs either the central hub or a peer, with an optional mining loop
//! crediting a named keystore wallet.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use ghyll_core::constants::{DEFAULT_CENTRAL_PORT, DEFAULT_DIFFICULTY, DEFAULT_PING_INTERVAL_SECS};
use ghyll_core::error::{BlockError, GhyllError};
use ghyll_node_lib::{Node, NodeConfig, NodeRole};
use ghyll_wallet::{Keystore, Wallet};
use tracing::{error, info, warn};

/// Ghyll node — a UTXO proof-of-work chain at educational scale.
#[derive(Parser, Debug)]
#[command(name = "ghyll-node", version, about = "Ghyll full node")]
struct Args {
    /// Run as the central hub instead of a peer
    #[arg(long)]
    central: bool,

    /// Data directory for chain storage and the keystore
    #[arg(long, default_value = None)]
    data_dir: Option<PathBuf>,

    /// Listening port (peers default to an ephemeral port)
    #[arg(long, default_value_t = 0)]
    listen_port: u16,

    /// Host of the central hub
    #[arg(long, default_value = "127.0.0.1")]
    central_host: String,

    /// Port of the central hub
    #[arg(long, default_value_t = DEFAULT_CENTRAL_PORT)]
    central_port: u16,

    /// Leading zero hex characters required of block hashes
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
    difficulty: u32,

    /// Seconds between liveness pings (central only)
    #[arg(long, default_value_t = DEFAULT_PING_INTERVAL_SECS)]
    ping_interval: f64,

    /// Mine continuously, crediting this named keystore wallet
    #[arg(long, value_name = "KEY_NAME")]
    mine: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Args {
    fn into_config(self) -> (NodeConfig, Option<String>, String) {
        let data_dir = self.data_dir.unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ghyll")
        });
        let config = NodeConfig {
            role: if self.central { NodeRole::Central } else { NodeRole::Peer },
            listen_port: self.listen_port,
            central_host: self.central_host,
            central_port: self.central_port,
            difficulty: self.difficulty,
            ping_interval: Duration::from_secs_f64(self.ping_interval),
            data_dir,
            log_level: self.log_level,
        };
        (config, self.mine, self.log_format)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let (config, mine_as, log_format) = args.into_config();

    init_logging(&config.log_level, &log_format);

    info!("Ghyll node v{}", env!("CARGO_PKG_VERSION"));
    info!(role = ?config.role, data_dir = %config.data_dir.display(), difficulty = config.difficulty);

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!("failed to create data dir: {e}");
        process::exit(1);
    }

    let miner_wallet = match mine_as
        .map(|name| load_miner_wallet(&config, &name))
        .transpose()
    {
        Ok(wallet) => wallet,
        Err(e) => {
            error!("failed to load miner wallet: {e:#}");
            process::exit(1);
        }
    };

    let node = match Node::start(config).await {
        Ok(node) => node,
        Err(e) => {
            error!("failed to start node: {e}");
            process::exit(1);
        }
    };

    if let Ok(height) = node.chain().height() {
        info!(height, "chain loaded");
    }

    let miner_task = miner_wallet.map(|wallet| {
        let node = Arc::clone(&node);
        tokio::task::spawn_blocking(move || mining_loop(node, wallet))
    });

    info!("node running (Ctrl+C to stop)");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("signal handler failed: {e}");
    }

    info!("shutting down");
    node.disconnect();
    if let Some(task) = miner_task {
        task.abort();
    }
    if let Err(e) = node.save_state() {
        warn!("flush on shutdown failed: {e}");
    }
}

fn load_miner_wallet(config: &NodeConfig, name: &str) -> anyhow::Result<Wallet> {
    let keystore = Keystore::open(config.keystore_path()).context("open keystore")?;
    let keypair = keystore.load_or_generate(name).context("load keypair")?;
    let wallet = Wallet::new(keypair);
    info!(name, address = %wallet.address(), "mining wallet ready");
    Ok(wallet)
}

/// Mine block after block until the process exits. A candidate beaten by a
/// gossiped block is expected noise, not an error.
fn mining_loop(node: Arc<Node>, wallet: Wallet) {
    loop {
        match node.mine_block(wallet.address()) {
            Ok(block) => info!(hash = %block.hash, "mined"),
            Err(GhyllError::Block(BlockError::AlreadyMined)) => {
                info!("beaten to the block, restarting on the new tip");
            }
            Err(e) => {
                error!("mining failed: {e}");
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

/// Initialize tracing with the given level and output format.
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
