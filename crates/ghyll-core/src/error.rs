//! Error types for the Ghyll protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("invalid value: must be greater than zero")] InvalidValue,
    #[error("source address equals destination")] SourceEqualsDestination,
    #[error("insufficient balance: short by {overdraft}")] InsufficientBalance { overdraft: u64 },
    #[error("transaction failed local verification")] Unverified,
    #[error("empty inputs or outputs")] EmptyInputsOrOutputs,
    #[error("zero-value output at index {0}")] ZeroValueOutput(usize),
    #[error("value overflow")] ValueOverflow,
    #[error("invalid coinbase: {0}")] InvalidCoinbase(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("stored hash does not match recomputed hash")] HashMismatch,
    #[error("hash does not satisfy difficulty {0}")] DifficultyNotMet(u32),
    #[error("previous hash is not the chain tip")] StalePreviousHash,
    #[error("nonce space exhausted")] NonceExhausted,
    #[error("block was already mined by a peer")] AlreadyMined,
    #[error("missing coinbase")] MissingCoinbase,
    #[error("coinbase is not the last transaction")] CoinbaseNotLast,
    #[error("invalid coinbase reward: got {got}, expected {expected}")] InvalidReward { got: u64, expected: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid secret key bytes")] InvalidSecretKey,
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("public key does not hash to the output address")] AddressMismatch,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("duplicate transaction: {0}")] DuplicateTransaction(String),
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("unknown UTXO: {0}")] UnknownUtxo(String),
    #[error("corrupt record: {0}")] Corrupt(String),
    #[error("storage backend: {0}")] Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    #[error("malformed message: {0}")] Malformed(String),
    #[error("message too large: {size}")] MessageTooLarge { size: usize },
    #[error("send timed out")] Timeout,
    #[error("io: {0}")] Io(String),
}

#[derive(Error, Debug)]
pub enum GhyllError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Net(#[from] NetError),
}
