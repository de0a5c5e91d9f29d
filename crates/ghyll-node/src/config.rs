//! Node configuration.
//!
//! Process-wide knobs — the central hub address, the default difficulty,
//! the ping interval — live here as plain configuration passed at
//! construction. Tests override by building their own config, never by
//! mutating globals.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use ghyll_core::constants::{DEFAULT_CENTRAL_PORT, DEFAULT_DIFFICULTY, DEFAULT_PING_INTERVAL_SECS};
use ghyll_core::error::NetError;

/// Which role this node plays in the star topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// The single well-known hub: accepts peers, rebroadcasts, prunes by
    /// ping/pong.
    Central,
    /// A leaf node: connects to the hub on startup.
    Peer,
}

/// Configuration for a node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub role: NodeRole,
    /// Port the transport listens on; 0 picks an ephemeral port.
    pub listen_port: u16,
    /// Host the central hub is reachable at.
    pub central_host: String,
    /// Port the central hub listens on.
    pub central_port: u16,
    /// Leading zero hex characters a block hash must carry.
    pub difficulty: u32,
    /// Interval between liveness pings (central only).
    pub ping_interval: Duration,
    /// Root directory for persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "ghyll_node=debug").
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ghyll");

        Self {
            role: NodeRole::Peer,
            listen_port: 0,
            central_host: "127.0.0.1".to_string(),
            central_port: DEFAULT_CENTRAL_PORT,
            difficulty: DEFAULT_DIFFICULTY,
            ping_interval: Duration::from_secs_f64(DEFAULT_PING_INTERVAL_SECS),
            data_dir,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Path to the RocksDB chain data directory.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }

    /// Path to the named-keypair keystore directory.
    pub fn keystore_path(&self) -> PathBuf {
        self.data_dir.join("keystore")
    }

    /// Resolve the central hub's socket address.
    pub fn central_addr(&self) -> Result<SocketAddr, NetError> {
        (self.central_host.as_str(), self.central_port)
            .to_socket_addrs()
            .map_err(|e| NetError::Io(e.to_string()))?
            .next()
            .ok_or_else(|| NetError::Io(format!("unresolvable host {}", self.central_host)))
    }
}
