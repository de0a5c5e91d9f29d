//! RocksDB-backed persistent chain store.
//!
//! Holds the append-only chain, the staged mempool, and the UTXO index in
//! column families, one per logical table. All mutations go through a single
//! atomic [`WriteBatch`], so a crash between a transaction row and its UTXO
//! updates cannot leave the two inconsistent.
//!
//! The UTXO index is updated on **mempool acceptance** as well as on block
//! connection; balances deliberately reflect unmined spends. Both paths
//! apply the same per-transaction rules, which are idempotent (delete by
//! key, insert by key), so re-applying them while migrating mempool rows
//! into a block is harmless.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, SliceTransform, WriteBatch};
use tracing::{debug, info};

use ghyll_core::crypto::address_from_public_key;
use ghyll_core::error::StoreError;
use ghyll_core::types::{Address, Block, Hash256, OutPoint, Transaction, Utxo};

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_BLOCK_INDEX: &str = "block_index";
const CF_TXS: &str = "txs";
const CF_TX_BLOCKS: &str = "tx_blocks";
const CF_MEMPOOL: &str = "mempool";
const CF_MEMPOOL_INDEX: &str = "mempool_index";
const CF_UTXOS: &str = "utxos";
const CF_ADDR_UTXOS: &str = "addr_utxos";
const CF_META: &str = "meta";

const ALL_CFS: &[&str] = &[
    CF_BLOCKS,
    CF_BLOCK_INDEX,
    CF_TXS,
    CF_TX_BLOCKS,
    CF_MEMPOOL,
    CF_MEMPOOL_INDEX,
    CF_UTXOS,
    CF_ADDR_UTXOS,
    CF_META,
];

// --- Metadata keys ---

const META_TIP_HASH: &[u8] = b"tip_hash";
const META_BLOCK_COUNT: &[u8] = b"block_count";
const META_MEMPOOL_SEQ: &[u8] = b"mempool_seq";

/// One row of payment history, derived from stored transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub tx_hash: Hash256,
    pub from: Address,
    pub to: Address,
    pub value: u64,
    /// The transaction's lock time (unix seconds at creation).
    pub time: u32,
    /// Whether the transaction has been included in a block.
    pub mined: bool,
}

/// RocksDB-backed chain, mempool, and UTXO store.
///
/// Concurrency: RocksDB serializes its own writes; callers additionally
/// serialize mutating operations behind a write lock (see
/// [`Chain`](crate::chain::Chain)) because mempool sequence allocation and
/// the block counter are read-modify-write.
pub struct Store {
    db: DB,
}

impl Store {
    /// Open or create a store at `path`, creating all column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), Self::cf_descriptors())
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        info!(path = %path.as_ref().display(), "chain store open");
        Ok(Self { db })
    }

    fn cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
        ALL_CFS
            .iter()
            .map(|name| {
                let mut opts = Options::default();
                // The address index is queried by 32-byte owner prefix.
                if *name == CF_ADDR_UTXOS {
                    opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(32));
                }
                ColumnFamilyDescriptor::new(*name, opts)
            })
            .collect()
    }

    // --- Mutations ---

    /// Persist a validated block, its transactions, and the UTXO effects.
    ///
    /// Mempool rows whose hashes appear in the block are migrated to it.
    pub fn add_block(&self, block: &Block) -> Result<(), StoreError> {
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_block_index = self.cf_handle(CF_BLOCK_INDEX)?;
        let cf_txs = self.cf_handle(CF_TXS)?;
        let cf_tx_blocks = self.cf_handle(CF_TX_BLOCKS)?;
        let cf_mempool = self.cf_handle(CF_MEMPOOL)?;
        let cf_mempool_index = self.cf_handle(CF_MEMPOOL_INDEX)?;
        let cf_meta = self.cf_handle(CF_META)?;

        let height = self.block_height()?;
        let mut batch = WriteBatch::default();

        batch.put_cf(cf_blocks, block.hash.as_bytes(), encode(block)?);
        batch.put_cf(
            cf_block_index,
            Self::block_index_key(block.timestamp, height),
            block.hash.as_bytes(),
        );
        batch.put_cf(cf_meta, META_TIP_HASH, block.hash.as_bytes());
        batch.put_cf(cf_meta, META_BLOCK_COUNT, (height + 1).to_le_bytes());

        for tx in &block.transactions {
            let tx_hash = tx.hash();
            batch.put_cf(cf_txs, tx_hash.as_bytes(), encode(tx)?);
            batch.put_cf(cf_tx_blocks, tx_hash.as_bytes(), block.hash.as_bytes());

            // Migrate out of the mempool if staged there.
            if let Some(seq) = self
                .db
                .get_cf(cf_mempool_index, tx_hash.as_bytes())
                .map_err(|e| StoreError::Backend(e.to_string()))?
            {
                batch.delete_cf(cf_mempool, &seq);
                batch.delete_cf(cf_mempool_index, tx_hash.as_bytes());
            }

            self.apply_utxo_rules(&mut batch, tx, &tx_hash)?;
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        info!(hash = %block.hash, height = height + 1, txs = block.transactions.len(), "block connected");
        Ok(())
    }

    /// Persist a transaction into the mempool and apply its UTXO effects.
    pub fn add_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let tx_hash = tx.hash();
        let cf_txs = self.cf_handle(CF_TXS)?;
        if self
            .db
            .get_cf(cf_txs, tx_hash.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .is_some()
        {
            return Err(StoreError::DuplicateTransaction(tx_hash.to_string()));
        }

        let cf_mempool = self.cf_handle(CF_MEMPOOL)?;
        let cf_mempool_index = self.cf_handle(CF_MEMPOOL_INDEX)?;
        let cf_meta = self.cf_handle(CF_META)?;

        let seq = self.meta_u64(META_MEMPOOL_SEQ)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_txs, tx_hash.as_bytes(), encode(tx)?);
        batch.put_cf(cf_mempool, seq.to_be_bytes(), tx_hash.as_bytes());
        batch.put_cf(cf_mempool_index, tx_hash.as_bytes(), seq.to_be_bytes());
        batch.put_cf(cf_meta, META_MEMPOOL_SEQ, (seq + 1).to_le_bytes());
        self.apply_utxo_rules(&mut batch, tx, &tx_hash)?;

        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        debug!(hash = %tx_hash, "transaction staged in mempool");
        Ok(())
    }

    /// UTXO index rules for one transaction, queued into `batch`:
    /// non-coinbase inputs delete their referenced entries, every output
    /// inserts one.
    fn apply_utxo_rules(
        &self,
        batch: &mut WriteBatch,
        tx: &Transaction,
        tx_hash: &Hash256,
    ) -> Result<(), StoreError> {
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let cf_addr = self.cf_handle(CF_ADDR_UTXOS)?;

        if !tx.is_coinbase() {
            for input in &tx.inputs {
                let key = Self::utxo_key(&input.previous_output);
                if let Some(bytes) = self
                    .db
                    .get_cf(cf_utxos, key)
                    .map_err(|e| StoreError::Backend(e.to_string()))?
                {
                    let spent: Utxo = decode(&bytes)?;
                    batch.delete_cf(cf_utxos, key);
                    batch.delete_cf(
                        cf_addr,
                        Self::addr_key(&spent.address, &input.previous_output),
                    );
                }
            }
        }

        for (index, output) in tx.outputs.iter().enumerate() {
            let utxo = Utxo {
                outpoint_hash: *tx_hash,
                outpoint_index: index as u32,
                value: output.value,
                address: output.address,
            };
            let outpoint = utxo.outpoint();
            let bytes = encode(&utxo)?;
            batch.put_cf(cf_utxos, Self::utxo_key(&outpoint), &bytes);
            batch.put_cf(cf_addr, Self::addr_key(&output.address, &outpoint), &bytes);
        }
        Ok(())
    }

    // --- Queries ---

    /// Blocks in ascending timestamp order (`None`), or in descending order
    /// up to and including the block with hash `from` (`Some`).
    pub fn blocks(&self, from: Option<&Hash256>) -> Result<Vec<Block>, StoreError> {
        let cf_index = self.cf_handle(CF_BLOCK_INDEX)?;
        match from {
            None => {
                let mut blocks = Vec::new();
                for item in self.db.iterator_cf(cf_index, IteratorMode::Start) {
                    let (_, hash_bytes) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
                    blocks.push(self.block_by_hash_bytes(&hash_bytes)?);
                }
                Ok(blocks)
            }
            Some(anchor) => {
                // Validate the anchor up front so an unknown hash is an
                // error, not an exhaustive dump.
                let cf_blocks = self.cf_handle(CF_BLOCKS)?;
                if self
                    .db
                    .get_cf(cf_blocks, anchor.as_bytes())
                    .map_err(|e| StoreError::Backend(e.to_string()))?
                    .is_none()
                {
                    return Err(StoreError::BlockNotFound(anchor.to_string()));
                }

                let mut blocks = Vec::new();
                for item in self.db.iterator_cf(cf_index, IteratorMode::End) {
                    let (_, hash_bytes) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
                    let block = self.block_by_hash_bytes(&hash_bytes)?;
                    let found = block.hash == *anchor;
                    blocks.push(block);
                    if found {
                        break;
                    }
                }
                Ok(blocks)
            }
        }
    }

    fn block_by_hash_bytes(&self, hash_bytes: &[u8]) -> Result<Block, StoreError> {
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let bytes = self
            .db
            .get_cf(cf_blocks, hash_bytes)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::BlockNotFound(hex::encode(hash_bytes)))?;
        decode(&bytes)
    }

    /// Mempool transactions in acceptance order.
    pub fn mempool(&self) -> Result<Vec<Transaction>, StoreError> {
        let cf_mempool = self.cf_handle(CF_MEMPOOL)?;
        let cf_txs = self.cf_handle(CF_TXS)?;
        let mut txs = Vec::new();
        for item in self.db.iterator_cf(cf_mempool, IteratorMode::Start) {
            let (_, hash_bytes) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let bytes = self
                .db
                .get_cf(cf_txs, &hash_bytes)
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .ok_or_else(|| {
                    StoreError::Corrupt(format!("dangling mempool row {}", hex::encode(&hash_bytes)))
                })?;
            txs.push(decode(&bytes)?);
        }
        Ok(txs)
    }

    /// Hash of the newest block, or `None` on an empty chain.
    pub fn latest_block_hash(&self) -> Result<Option<Hash256>, StoreError> {
        let cf_meta = self.cf_handle(CF_META)?;
        match self
            .db
            .get_cf(cf_meta, META_TIP_HASH)
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Some(Hash256(hash)))
            }
            Some(_) => Err(StoreError::Corrupt("tip hash length".into())),
            None => Ok(None),
        }
    }

    /// Number of blocks in the chain.
    pub fn block_height(&self) -> Result<u64, StoreError> {
        self.meta_u64(META_BLOCK_COUNT)
    }

    /// Sum of UTXO values owned by `address`.
    pub fn balance(&self, address: &Address) -> Result<u64, StoreError> {
        Ok(self.unspent(address)?.iter().map(|u| u.value).sum())
    }

    /// UTXO entries owned by `address`, in index key order (stable).
    pub fn unspent(&self, address: &Address) -> Result<Vec<Utxo>, StoreError> {
        let cf_addr = self.cf_handle(CF_ADDR_UTXOS)?;
        let prefix = address.as_bytes();
        let mut utxos = Vec::new();
        for item in self.db.prefix_iterator_cf(cf_addr, prefix) {
            let (key, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            // The prefix iterator may overshoot its prefix; stop when it does.
            if key.len() < 32 || &key[..32] != prefix.as_slice() {
                break;
            }
            utxos.push(decode(&value)?);
        }
        Ok(utxos)
    }

    /// Look up a single UTXO by outpoint.
    pub fn utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>, StoreError> {
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        match self
            .db
            .get_cf(cf_utxos, Self::utxo_key(outpoint))
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Payment history visible to the owner of `public_key`.
    ///
    /// A row is kept when the recipient is the key's address or the
    /// transaction was sent with that key. The sender of a coinbase is the
    /// miner address carried in its input's `public_key` field; change rows
    /// (sender paying themselves) are filtered for regular transactions but
    /// kept for coinbases, otherwise every mining reward would vanish.
    pub fn payments(&self, public_key: &[u8]) -> Result<Vec<Payment>, StoreError> {
        let own_address = address_from_public_key(public_key);
        let cf_txs = self.cf_handle(CF_TXS)?;
        let cf_tx_blocks = self.cf_handle(CF_TX_BLOCKS)?;

        let mut payments = Vec::new();
        for item in self.db.iterator_cf(cf_txs, IteratorMode::Start) {
            let (hash_bytes, tx_bytes) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let tx: Transaction = decode(&tx_bytes)?;
            let tx_hash = tx.hash();

            let Some(first_input) = tx.inputs.first() else {
                continue;
            };
            let coinbase = tx.is_coinbase();
            let sender: Address = if coinbase {
                match <[u8; 32]>::try_from(first_input.public_key.as_slice()) {
                    Ok(bytes) => Hash256(bytes),
                    Err(_) => continue,
                }
            } else {
                address_from_public_key(&first_input.public_key)
            };
            let sent_by_us = !coinbase && first_input.public_key == public_key;

            let mined = self
                .db
                .get_cf(cf_tx_blocks, &hash_bytes)
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .is_some();

            for output in &tx.outputs {
                if !coinbase && output.address == sender {
                    continue; // change back to the sender
                }
                if output.address == own_address || sent_by_us {
                    payments.push(Payment {
                        tx_hash,
                        from: sender,
                        to: output.address,
                        value: output.value,
                        time: tx.lock_time,
                        mined,
                    });
                }
            }
        }
        payments.sort_by_key(|p| p.time);
        Ok(payments)
    }

    // --- Lifecycle ---

    /// Flush memtables and the WAL to disk.
    pub fn save_state(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Drop every column family and recreate it empty: height 0, empty
    /// mempool, empty UTXO set.
    pub fn clear_state(&mut self) -> Result<(), StoreError> {
        for name in ALL_CFS {
            self.db
                .drop_cf(name)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let mut opts = Options::default();
            if *name == CF_ADDR_UTXOS {
                opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(32));
            }
            self.db
                .create_cf(*name, &opts)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        info!("chain store cleared");
        Ok(())
    }

    // --- Internal helpers ---

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))
    }

    fn meta_u64(&self, key: &[u8]) -> Result<u64, StoreError> {
        let cf_meta = self.cf_handle(CF_META)?;
        match self
            .db
            .get_cf(cf_meta, key)
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 8 => Ok(u64::from_le_bytes(bytes.try_into().unwrap())),
            Some(_) => Err(StoreError::Corrupt("metadata value length".into())),
            None => Ok(0),
        }
    }

    /// UTXO key: outpoint_hash || index(BE).
    fn utxo_key(outpoint: &OutPoint) -> [u8; 36] {
        let mut key = [0u8; 36];
        key[0..32].copy_from_slice(outpoint.hash.as_bytes());
        key[32..36].copy_from_slice(&outpoint.index.to_be_bytes());
        key
    }

    /// Address index key: address || outpoint_hash || index(BE).
    fn addr_key(address: &Address, outpoint: &OutPoint) -> [u8; 68] {
        let mut key = [0u8; 68];
        key[0..32].copy_from_slice(address.as_bytes());
        key[32..64].copy_from_slice(outpoint.hash.as_bytes());
        key[64..68].copy_from_slice(&outpoint.index.to_be_bytes());
        key
    }

    /// Block index key: timestamp(BE) || height(BE).
    ///
    /// The height suffix keeps same-second blocks in chain order, so a
    /// timestamp walk is also a chain walk.
    fn block_index_key(timestamp: u32, height: u64) -> [u8; 12] {
        let mut key = [0u8; 12];
        key[0..4].copy_from_slice(&timestamp.to_be_bytes());
        key[4..12].copy_from_slice(&height.to_be_bytes());
        key
    }
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(value)
}
