//! Chain engine: the store plus the reward schedule.
//!
//! A thin wrapper in the manner of a read-mostly facade: queries take the
//! store's read lock, mutations its write lock (mempool sequence allocation
//! and the block counter are read-modify-write, so writers must serialize).
//! The engine holds no in-memory chain state of its own.

use std::sync::Arc;

use parking_lot::RwLock;

use ghyll_core::error::StoreError;
use ghyll_core::reward;
use ghyll_core::types::{Address, Block, Hash256, OutPoint, Transaction, Utxo};

use crate::store::{Payment, Store};

/// Chain engine over a shared store.
#[derive(Clone)]
pub struct Chain {
    store: Arc<RwLock<Store>>,
}

impl Chain {
    pub fn new(store: Arc<RwLock<Store>>) -> Self {
        Self { store }
    }

    /// Number of blocks in the chain.
    pub fn height(&self) -> Result<u64, StoreError> {
        self.store.read().block_height()
    }

    /// Hash of the newest block, or `None` on an empty chain.
    pub fn latest_block_hash(&self) -> Result<Option<Hash256>, StoreError> {
        self.store.read().latest_block_hash()
    }

    /// The reward the next mined block will pay.
    pub fn current_block_reward(&self) -> Result<u64, StoreError> {
        Ok(reward::block_reward(self.height()?))
    }

    /// Total drips minted by the chain so far.
    pub fn circulating_supply(&self) -> Result<u64, StoreError> {
        Ok(reward::circulating_supply(self.height()?))
    }

    pub fn balance(&self, address: &Address) -> Result<u64, StoreError> {
        self.store.read().balance(address)
    }

    pub fn unspent(&self, address: &Address) -> Result<Vec<Utxo>, StoreError> {
        self.store.read().unspent(address)
    }

    pub fn utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>, StoreError> {
        self.store.read().utxo(outpoint)
    }

    pub fn payments(&self, public_key: &[u8]) -> Result<Vec<Payment>, StoreError> {
        self.store.read().payments(public_key)
    }

    pub fn mempool(&self) -> Result<Vec<Transaction>, StoreError> {
        self.store.read().mempool()
    }

    pub fn blocks(&self, from: Option<&Hash256>) -> Result<Vec<Block>, StoreError> {
        self.store.read().blocks(from)
    }

    /// Stage a transaction into the mempool.
    pub fn add_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        self.store.write().add_transaction(tx)
    }

    /// Persist an externally validated block.
    pub fn add_block(&self, block: &Block) -> Result<(), StoreError> {
        self.store.write().add_block(block)
    }

    /// Assemble a block from mined parts and persist it.
    pub fn create_block(
        &self,
        nonce: u32,
        hash: Hash256,
        previous_hash: Hash256,
        timestamp: u32,
        transactions: Vec<Transaction>,
    ) -> Result<Block, StoreError> {
        let block = Block { timestamp, transactions, nonce, hash, previous_hash };
        self.store.write().add_block(&block)?;
        Ok(block)
    }
}
