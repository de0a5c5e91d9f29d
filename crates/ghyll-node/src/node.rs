//! Node orchestrator: transaction creation, mining, gossip handling, and
//! peer liveness.
//!
//! A node is either the `Central` hub — it accepts peers, rebroadcasts
//! gossip, and prunes silent peers by ping/pong — or a `Peer` that announces
//! itself to the hub on startup. The transport calls back into the node
//! through a weak reference; the node owns the transport, never the reverse.
//!
//! Mining is not cancelled mid-search. A block arriving while the search
//! runs is ingested by the `BLOCKS` handler; the miner detects the moved tip
//! afterwards and discards its stale candidate.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ghyll_core::constants::PROTOCOL_VERSION;
use ghyll_core::crypto::verify_input;
use ghyll_core::error::{BlockError, GhyllError, StoreError, TransactionError};
use ghyll_core::reward::block_reward;
use ghyll_core::types::{Address, Block, Hash256, Transaction, TxInput, TxOutput};
use ghyll_net::codec::{
    BlocksPayload, GetBlocksPayload, Message, TransactionsPayload, VersionPayload,
};
use ghyll_net::transport::{MessageHandler, TcpTransport};
use ghyll_wallet::Wallet;

use crate::chain::Chain;
use crate::config::{NodeConfig, NodeRole};
use crate::store::Store;

/// Lifecycle events emitted to subscribers.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    TransactionCreated(Hash256),
    TransactionsReceived { count: usize, from: SocketAddr },
    BlockMined(Hash256),
    BlocksAccepted { count: usize, from: SocketAddr },
    PeerAdded(SocketAddr),
    PeerRemoved(SocketAddr),
}

/// A running Ghyll node.
pub struct Node {
    config: NodeConfig,
    chain: Chain,
    store: Arc<RwLock<Store>>,
    transport: Option<Arc<TcpTransport>>,
    /// Known peer endpoints. For a peer node this is just the hub.
    peers: Mutex<HashSet<SocketAddr>>,
    /// When the latest PING was sent to each peer.
    ping_sent: Mutex<HashMap<SocketAddr, Instant>>,
    /// When the latest PONG arrived from each peer.
    pong_received: Mutex<HashMap<SocketAddr, Instant>>,
    /// Last time any message arrived from each endpoint.
    last_seen: Mutex<HashMap<SocketAddr, Instant>>,
    /// Whether this node believes it is caught up with the network.
    connected: AtomicBool,
    events: broadcast::Sender<NodeEvent>,
    liveness_task: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Start a networked node: open the store, bind the transport, install
    /// the handler, and (per role) announce to the hub or start liveness.
    pub async fn start(config: NodeConfig) -> Result<Arc<Self>, GhyllError> {
        let listen_port = match config.role {
            NodeRole::Central => config.central_port,
            NodeRole::Peer => config.listen_port,
        };
        let transport = TcpTransport::bind(listen_port)
            .await
            .map_err(|e| ghyll_core::error::NetError::Io(e.to_string()))?;

        let node = Self::build(config, Some(Arc::clone(&transport)))?;
        transport.set_handler(Arc::downgrade(&node) as Weak<dyn MessageHandler>);

        match node.config.role {
            NodeRole::Peer => {
                let hub = node.config.central_addr()?;
                node.peers.lock().insert(hub);
                node.send(node.version_message()?, hub);
                info!(%hub, "announced to central hub");
            }
            NodeRole::Central => {
                node.spawn_liveness();
                info!(port = node.listen_port(), "central hub listening");
            }
        }
        Ok(node)
    }

    /// Open a node with no networking: same chain, miner, and wallet paths,
    /// but gossip becomes a no-op. Used by tools and tests.
    pub fn offline(config: NodeConfig) -> Result<Arc<Self>, GhyllError> {
        Self::build(config, None)
    }

    fn build(
        config: NodeConfig,
        transport: Option<Arc<TcpTransport>>,
    ) -> Result<Arc<Self>, GhyllError> {
        let store = Store::open(config.store_path())?;
        let store = Arc::new(RwLock::new(store));
        let chain = Chain::new(Arc::clone(&store));
        let (events, _) = broadcast::channel(256);

        Ok(Arc::new(Self {
            config,
            chain,
            store,
            transport,
            peers: Mutex::new(HashSet::new()),
            ping_sent: Mutex::new(HashMap::new()),
            pong_received: Mutex::new(HashMap::new()),
            last_seen: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
            events,
            liveness_task: Mutex::new(None),
        }))
    }

    // --- Accessors ---

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn role(&self) -> NodeRole {
        self.config.role
    }

    /// The port the transport actually listens on (resolves port 0).
    pub fn listen_port(&self) -> u16 {
        self.transport
            .as_ref()
            .map(|t| t.local_port())
            .unwrap_or(self.config.listen_port)
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        self.peers.lock().iter().copied().collect()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    // --- Operations ---

    /// Build, persist, and gossip a transaction paying `value` drips from
    /// `wallet` to `recipient`.
    pub fn create_transaction(
        &self,
        wallet: &Wallet,
        recipient: Address,
        value: u64,
    ) -> Result<Transaction, GhyllError> {
        if value == 0 {
            return Err(TransactionError::InvalidValue.into());
        }
        if recipient == wallet.address() {
            return Err(TransactionError::SourceEqualsDestination.into());
        }
        let balance = self.chain.balance(&wallet.address())?;
        if balance < value {
            return Err(TransactionError::InsufficientBalance { overdraft: value - balance }.into());
        }

        // Gather UTXOs in store order until the amount is covered.
        let mut spend_value: u64 = 0;
        let mut inputs = Vec::new();
        for utxo in self.chain.unspent(&wallet.address())? {
            spend_value = spend_value.saturating_add(utxo.value);
            inputs.push(wallet.sign_utxo(&utxo));
            if spend_value >= value {
                break;
            }
        }

        // Defense in depth: never gossip an input we cannot verify ourselves.
        for input in &inputs {
            if wallet.verify_own_input(input).is_err() {
                return Err(TransactionError::Unverified.into());
            }
        }

        let change = spend_value - value;
        let mut outputs = vec![TxOutput { value, address: recipient }];
        if change > 0 {
            outputs.push(TxOutput { value: change, address: wallet.address() });
        }

        let tx = Transaction { inputs, outputs, lock_time: unix_now() };
        self.chain.add_transaction(&tx)?;
        info!(hash = %tx.hash(), value, "transaction created");

        self.broadcast(
            Message::Transactions(TransactionsPayload { transactions: vec![tx.clone()] }),
            None,
        );
        let _ = self.events.send(NodeEvent::TransactionCreated(tx.hash()));
        Ok(tx)
    }

    /// Mine the next block onto the current tip, crediting `miner_address`.
    ///
    /// Returns [`BlockError::AlreadyMined`] if another block landed on the
    /// tip while the search ran; the stale candidate (and its coinbase) is
    /// discarded unpersisted.
    pub fn mine_block(&self, miner_address: Address) -> Result<Block, GhyllError> {
        let mut transactions = self.chain.mempool()?;
        let height = self.chain.height()?;
        // The height as lock time keeps coinbase hashes distinct even when
        // two same-epoch blocks are mined within one second.
        let coinbase = Transaction {
            inputs: vec![TxInput::coinbase(miner_address)],
            outputs: vec![TxOutput { value: block_reward(height), address: miner_address }],
            lock_time: height as u32,
        };
        transactions.push(coinbase.clone());

        let previous_hash = self.chain.latest_block_hash()?.unwrap_or(Hash256::ZERO);
        let timestamp = unix_now();

        let (hash, nonce) =
            ghyll_pow::work(&previous_hash, timestamp, &transactions, self.config.difficulty)?;

        // Post-mine race check: a gossiped block may have moved the tip
        // while we searched. Its handler already cleaned the mempool.
        let tip_now = self.chain.latest_block_hash()?.unwrap_or(Hash256::ZERO);
        if tip_now != previous_hash {
            debug!(%tip_now, "tip moved during proof-of-work, discarding candidate");
            return Err(BlockError::AlreadyMined.into());
        }

        self.chain.add_transaction(&coinbase)?;
        let block =
            self.chain.create_block(nonce, hash, previous_hash, timestamp, transactions)?;
        info!(hash = %block.hash, height = height + 1, "block mined");

        self.broadcast(
            Message::Blocks(BlocksPayload { blocks: vec![block.clone()] }),
            None,
        );
        let _ = self.events.send(NodeEvent::BlockMined(block.hash));
        Ok(block)
    }

    /// Flush the store to disk.
    pub fn save_state(&self) -> Result<(), GhyllError> {
        self.store.read().save_state()?;
        Ok(())
    }

    /// Wipe the chain, mempool, and UTXO set.
    pub fn clear_state(&self) -> Result<(), GhyllError> {
        self.store.write().clear_state()?;
        Ok(())
    }

    /// Stop the listener and the liveness task. In-flight outbound sends may
    /// still complete.
    pub fn disconnect(&self) {
        if let Some(transport) = &self.transport {
            transport.shutdown();
        }
        if let Some(task) = self.liveness_task.lock().take() {
            task.abort();
        }
        self.connected.store(false, Ordering::Relaxed);
        info!("node disconnected");
    }

    // --- Gossip plumbing ---

    fn send(&self, message: Message, to: SocketAddr) {
        if let Some(transport) = &self.transport {
            transport.send(message, to);
        }
    }

    fn broadcast(&self, message: Message, except: Option<SocketAddr>) {
        let Some(transport) = &self.transport else {
            return;
        };
        for peer in self.peers.lock().iter() {
            if Some(*peer) != except {
                transport.send(message.clone(), *peer);
            }
        }
    }

    fn version_message(&self) -> Result<Message, GhyllError> {
        Ok(Message::Version(VersionPayload {
            version: PROTOCOL_VERSION,
            block_height: self.chain.height()?,
        }))
    }

    fn add_peer(&self, addr: SocketAddr) {
        if self.peers.lock().insert(addr) {
            info!(%addr, "peer added");
            let _ = self.events.send(NodeEvent::PeerAdded(addr));
        }
    }

    // --- Message handlers ---

    fn handle_version(&self, payload: VersionPayload, sender: SocketAddr) {
        if payload.version != PROTOCOL_VERSION {
            warn!(%sender, version = payload.version, "version mismatch, ignoring peer");
            return;
        }
        let local_height = match self.chain.height() {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "height query failed");
                return;
            }
        };

        if local_height < payload.block_height {
            // Behind: pull the missing tail and the remote mempool.
            let anchor = match self.chain.latest_block_hash() {
                Ok(Some(hash)) => hash.as_bytes().to_vec(),
                Ok(None) => Vec::new(),
                Err(e) => {
                    warn!(error = %e, "tip query failed");
                    return;
                }
            };
            self.connected.store(false, Ordering::Relaxed);
            self.send(Message::GetBlocks(GetBlocksPayload { from_block_hash: anchor }), sender);
            self.send(Message::GetTransactions, sender);
        } else if local_height > payload.block_height {
            // Ahead: let the sender pull from us.
            if let Ok(version) = self.version_message() {
                self.send(version, sender);
            }
        } else if !self.peers.lock().contains(&sender) {
            // Equal heights with a new acquaintance: complete the handshake.
            if let Ok(version) = self.version_message() {
                self.send(version, sender);
            }
        }

        if self.config.role == NodeRole::Central {
            self.add_peer(sender);
        }
        if local_height >= payload.block_height {
            self.connected.store(true, Ordering::Relaxed);
        }
    }

    fn handle_get_transactions(&self, sender: SocketAddr) {
        match self.chain.mempool() {
            Ok(transactions) => {
                self.send(Message::Transactions(TransactionsPayload { transactions }), sender);
            }
            Err(e) => warn!(error = %e, "mempool query failed"),
        }
    }

    fn handle_transactions(&self, payload: TransactionsPayload, sender: SocketAddr) {
        let mut accepted = 0;
        for tx in &payload.transactions {
            if !self.verify_incoming(tx) {
                debug!(hash = %tx.hash(), %sender, "dropping unverified transaction");
                continue;
            }
            match self.chain.add_transaction(tx) {
                Ok(()) => accepted += 1,
                // Gossip duplicates are expected; dedup is by hash here.
                Err(StoreError::DuplicateTransaction(_)) => {}
                Err(e) => warn!(error = %e, "failed to stage transaction"),
            }
        }
        if accepted > 0 {
            let _ = self
                .events
                .send(NodeEvent::TransactionsReceived { count: accepted, from: sender });
        }
        if self.config.role == NodeRole::Central {
            self.broadcast(Message::Transactions(payload), Some(sender));
        }
    }

    /// Every input must reference a distinct live UTXO, carry a signature
    /// valid over its outpoint hash, *and* hash its public key to that
    /// UTXO's address — a forged `public_key` field fails even with a valid
    /// self-signature. The referenced values must also cover the outputs,
    /// the same no-overdraft rule `create_transaction` applies locally, so
    /// a peer cannot mint currency by gossiping outputs worth more than
    /// their inputs.
    fn verify_incoming(&self, tx: &Transaction) -> bool {
        if tx.check_structure().is_err() {
            return false;
        }
        let Some(output_total) = tx.total_output_value() else {
            return false;
        };

        let mut spent = HashSet::new();
        let mut input_total: u64 = 0;
        for input in &tx.inputs {
            if !spent.insert(input.previous_output) {
                return false;
            }
            match self.chain.utxo(&input.previous_output) {
                Ok(Some(utxo)) if verify_input(input, &utxo.address).is_ok() => {
                    input_total = input_total.saturating_add(utxo.value);
                }
                _ => return false,
            }
        }
        input_total >= output_total
    }

    fn handle_get_blocks(&self, payload: GetBlocksPayload, sender: SocketAddr) {
        let result = if payload.from_block_hash.is_empty() {
            self.chain.blocks(None)
        } else {
            match <[u8; 32]>::try_from(payload.from_block_hash.as_slice()) {
                Ok(bytes) => self.chain.blocks(Some(&Hash256(bytes))),
                Err(_) => {
                    warn!(%sender, "malformed block anchor");
                    return;
                }
            }
        };
        match result {
            Ok(blocks) => self.send(Message::Blocks(BlocksPayload { blocks }), sender),
            Err(StoreError::BlockNotFound(hash)) => {
                warn!(%sender, %hash, "unknown block anchor, sending nothing");
            }
            Err(e) => warn!(error = %e, "block walk failed"),
        }
    }

    fn handle_blocks(&self, payload: BlocksPayload, sender: SocketAddr) {
        let mut accepted = 0;
        for block in &payload.blocks {
            let tip = match self.chain.latest_block_hash() {
                Ok(tip) => tip.unwrap_or(Hash256::ZERO),
                Err(e) => {
                    warn!(error = %e, "tip query failed");
                    return;
                }
            };
            if block.previous_hash != tip {
                debug!(hash = %block.hash, "skipping block not on our tip");
                continue;
            }
            // The incoming block's zero-based index is the current count.
            let height = match self.chain.height() {
                Ok(height) => height,
                Err(e) => {
                    warn!(error = %e, "height query failed");
                    return;
                }
            };
            if let Err(e) = ghyll_pow::validate(block, &tip, self.config.difficulty, height) {
                warn!(hash = %block.hash, error = %e, "rejecting invalid block");
                continue;
            }
            // add_block also migrates any matching mempool rows.
            if let Err(e) = self.chain.add_block(block) {
                warn!(hash = %block.hash, error = %e, "failed to connect block");
                continue;
            }
            accepted += 1;
        }

        let was_connected = self.connected.swap(true, Ordering::Relaxed);
        if accepted > 0 {
            // Catching up from scratch: the mempool snapshot requested
            // alongside the chain may have raced ahead of it and been
            // dropped as unverifiable. Re-pull it now that UTXOs exist.
            if !was_connected {
                self.send(Message::GetTransactions, sender);
            }
            let _ = self
                .events
                .send(NodeEvent::BlocksAccepted { count: accepted, from: sender });
            if self.config.role == NodeRole::Central {
                self.broadcast(Message::Blocks(payload), Some(sender));
            }
        }
    }

    fn handle_pong(&self, sender: SocketAddr) {
        self.pong_received.lock().insert(sender, Instant::now());
    }

    // --- Liveness (central only) ---

    fn spawn_liveness(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = self.config.ping_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                let Some(node) = weak.upgrade() else { break };
                node.prune_and_ping();
            }
        });
        *self.liveness_task.lock() = Some(task);
    }

    /// One liveness round: drop peers whose latest ping went unanswered for
    /// more than half an interval, then ping every survivor.
    fn prune_and_ping(&self) {
        let half = self.config.ping_interval / 2;
        let mut removed = Vec::new();
        {
            let mut peers = self.peers.lock();
            let ping_sent = self.ping_sent.lock();
            let pong_received = self.pong_received.lock();
            peers.retain(|peer| {
                let Some(&sent) = ping_sent.get(peer) else {
                    return true; // not pinged yet
                };
                let answered = pong_received
                    .get(peer)
                    .is_some_and(|&received| received >= sent && received - sent <= half);
                if answered || sent.elapsed() <= half {
                    true
                } else {
                    removed.push(*peer);
                    false
                }
            });
        }

        for peer in removed {
            info!(%peer, "pruning silent peer");
            self.ping_sent.lock().remove(&peer);
            self.pong_received.lock().remove(&peer);
            let _ = self.events.send(NodeEvent::PeerRemoved(peer));
        }

        let survivors = self.peers();
        for peer in survivors {
            self.send(Message::Ping, peer);
            self.ping_sent.lock().insert(peer, Instant::now());
        }
    }
}

impl MessageHandler for Node {
    fn handle(&self, message: Message, sender: SocketAddr) {
        self.last_seen.lock().insert(sender, Instant::now());
        debug!(%sender, command = ?message.command(), "message received");
        match message {
            Message::Version(payload) => self.handle_version(payload, sender),
            Message::GetTransactions => self.handle_get_transactions(sender),
            Message::Transactions(payload) => self.handle_transactions(payload, sender),
            Message::GetBlocks(payload) => self.handle_get_blocks(payload, sender),
            Message::Blocks(payload) => self.handle_blocks(payload, sender),
            // The transport already answered with PONG; this is a sighting.
            Message::Ping => {}
            Message::Pong => self.handle_pong(sender),
        }
    }
}

fn unix_now() -> u32 {
    chrono::Utc::now().timestamp() as u32
}
