//! Test node construction and convergence polling.

use std::sync::Arc;
use std::time::Duration;

use ghyll_core::crypto::KeyPair;
use ghyll_node_lib::{Node, NodeConfig, NodeRole};
use ghyll_wallet::Wallet;

/// Low difficulty so test mining finishes in milliseconds.
pub const TEST_DIFFICULTY: u32 = 2;

/// A fresh wallet with a random key.
pub fn wallet() -> Wallet {
    Wallet::new(KeyPair::generate())
}

/// Config rooted in its own temp directory.
pub fn test_config(dir: &tempfile::TempDir) -> NodeConfig {
    NodeConfig {
        difficulty: TEST_DIFFICULTY,
        data_dir: dir.path().to_path_buf(),
        ..NodeConfig::default()
    }
}

/// An offline node in a fresh temp directory.
pub fn offline_node() -> (Arc<Node>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::offline(test_config(&dir)).unwrap();
    (node, dir)
}

/// Start a central hub on an ephemeral port.
pub async fn start_central(ping_interval: Duration) -> (Arc<Node>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        role: NodeRole::Central,
        central_port: 0, // resolve to an ephemeral port
        ping_interval,
        ..test_config(&dir)
    };
    let node = Node::start(config).await.unwrap();
    (node, dir)
}

/// Start a peer pointed at a hub on the given port.
pub async fn start_peer(central_port: u16) -> (Arc<Node>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        role: NodeRole::Peer,
        listen_port: 0,
        central_host: "127.0.0.1".to_string(),
        central_port,
        ..test_config(&dir)
    };
    let node = Node::start(config).await.unwrap();
    (node, dir)
}

/// Poll `condition` until it holds or `deadline` passes.
pub async fn converge(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if condition() {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
