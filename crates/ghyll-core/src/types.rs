//! Core protocol types: transactions, blocks, UTXOs.
//!
//! All monetary values are in drips (1 GHYLL = 10^8 drips). Hashes are
//! SHA-256 over canonical little-endian byte layouts; variable-length
//! fields (public keys, signatures) are concatenated without length
//! prefixes inside hash pre-images.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte SHA-256 digest.
///
/// Used for transaction hashes, block hashes, and addresses (an address is
/// the double SHA-256 of a public key's raw bytes). Equality is byte-exact.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used for coinbase outpoints and the
    /// genesis block's previous hash.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An address: the double SHA-256 of a public key's raw bytes.
///
/// Kept as a plain [`Hash256`]; the distinction is one of derivation, not
/// representation.
pub type Address = Hash256;

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256(Sha256::digest(data).into())
}

/// SHA-256 applied twice.
pub fn double_sha256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    Hash256(Sha256::digest(first).into())
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Hash of the transaction containing the referenced output.
    pub hash: Hash256,
    /// Index of the output within that transaction.
    pub index: u32,
}

impl OutPoint {
    /// The sentinel outpoint `(zeros, 0)` marking a coinbase input.
    pub fn null() -> Self {
        Self { hash: Hash256::ZERO, index: 0 }
    }

    pub fn is_null(&self) -> bool {
        self.hash.is_zero() && self.index == 0
    }

    /// Canonical encoding: hash ‖ index_le.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.hash.as_bytes());
        buf.extend_from_slice(&self.index.to_le_bytes());
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.index)
    }
}

/// A transaction input, spending a previous output.
///
/// Coinbase inputs carry the null outpoint and an empty signature; their
/// `public_key` field holds the 32-byte miner address so payment history
/// can attribute the reward.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null for coinbase.
    pub previous_output: OutPoint,
    /// SEC1 public key bytes of the spender. Miner address for coinbase.
    pub public_key: Vec<u8>,
    /// ECDSA signature over the outpoint hash. Empty for coinbase.
    pub signature: Vec<u8>,
}

impl TxInput {
    /// A coinbase input attributing the reward to `miner_address`.
    pub fn coinbase(miner_address: Address) -> Self {
        Self {
            previous_output: OutPoint::null(),
            public_key: miner_address.as_bytes().to_vec(),
            signature: Vec::new(),
        }
    }

    /// Canonical encoding: outpoint ‖ public_key ‖ signature.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        self.previous_output.serialize_into(buf);
        buf.extend_from_slice(&self.public_key);
        buf.extend_from_slice(&self.signature);
    }
}

/// A transaction output, creating a new UTXO.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in drips.
    pub value: u64,
    /// Double SHA-256 of the recipient's public key.
    pub address: Address,
}

impl TxOutput {
    /// Canonical encoding: value_le ‖ address.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(self.address.as_bytes());
    }

    /// SHA-256 of the canonical encoding.
    pub fn hash(&self) -> Hash256 {
        let mut buf = Vec::with_capacity(8 + 32);
        self.serialize_into(&mut buf);
        sha256(&buf)
    }
}

/// A transaction transferring value between addresses.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Unix seconds at creation time.
    pub lock_time: u32,
}

impl Transaction {
    /// Canonical encoding: concat(inputs) ‖ concat(outputs) ‖ lock_time_le.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        for input in &self.inputs {
            input.serialize_into(buf);
        }
        for output in &self.outputs {
            output.serialize_into(buf);
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
    }

    /// Compute the transaction hash (SHA-256 of the canonical encoding).
    pub fn hash(&self) -> Hash256 {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        sha256(&buf)
    }

    /// Check if this is a coinbase transaction (single input with the null
    /// outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Sum of all output values. `None` on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Structural checks shared by local creation and gossip ingestion:
    /// non-empty inputs and outputs, no zero-value outputs.
    pub fn check_structure(&self) -> Result<(), crate::error::TransactionError> {
        use crate::error::TransactionError;
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(TransactionError::EmptyInputsOrOutputs);
        }
        for (i, out) in self.outputs.iter().enumerate() {
            if out.value == 0 {
                return Err(TransactionError::ZeroValueOutput(i));
            }
        }
        Ok(())
    }
}

/// A complete block.
///
/// `hash` is the stored proof-of-work digest; [`Block::compute_hash`]
/// re-derives it from the other fields.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Unix seconds at assembly time.
    pub timestamp: u32,
    /// Ordered transactions; the coinbase is last.
    pub transactions: Vec<Transaction>,
    /// Proof-of-work nonce.
    pub nonce: u32,
    /// SHA-256 of the canonical encoding.
    pub hash: Hash256,
    /// Hash of the preceding block; all-zeros for genesis.
    pub previous_hash: Hash256,
}

impl Block {
    /// Compute the block hash from its constituent fields.
    ///
    /// Pre-image: previous_hash ‖ timestamp_le ‖ nonce_le ‖ concat(ser(tx)),
    /// transactions in the given order.
    pub fn compute_hash(
        previous_hash: &Hash256,
        timestamp: u32,
        nonce: u32,
        transactions: &[Transaction],
    ) -> Hash256 {
        let mut buf = Vec::new();
        buf.extend_from_slice(previous_hash.as_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(&nonce.to_le_bytes());
        for tx in transactions {
            tx.serialize_into(&mut buf);
        }
        sha256(&buf)
    }

    /// Re-derive this block's hash from its own fields.
    pub fn recompute_hash(&self) -> Hash256 {
        Self::compute_hash(&self.previous_hash, self.timestamp, self.nonce, &self.transactions)
    }

    /// The coinbase transaction (last position), if present.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.last().filter(|tx| tx.is_coinbase())
    }
}

/// An entry in the unspent transaction output set.
///
/// Uniquely keyed by `(outpoint_hash, outpoint_index)`.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Utxo {
    /// Hash of the transaction that created the output.
    pub outpoint_hash: Hash256,
    /// Index of the output within that transaction.
    pub outpoint_index: u32,
    /// Value in drips.
    pub value: u64,
    /// Owner address.
    pub address: Address,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint { hash: self.outpoint_hash, index: self.outpoint_index }
    }
}
