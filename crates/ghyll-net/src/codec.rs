//! Wire message envelope and payload encoding.
//!
//! Every datagram is one JSON **envelope** `{ command, payload, from_port }`
//! where `payload` holds the JSON bytes of the command's payload object.
//! Decoding tolerates trailing whitespace and rejects unknown keys.
//!
//! The `from_port` field lets a receiver reconstruct the sender's listening
//! endpoint from the transport-observed remote host (the ephemeral source
//! port of a one-shot connection is useless for replying).

use serde::{Deserialize, Serialize};

use ghyll_core::constants::MAX_MESSAGE_SIZE;
use ghyll_core::error::NetError;
use ghyll_core::types::{Block, Transaction};

/// Command tag of a wire envelope.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Version,
    GetTransactions,
    Transactions,
    GetBlocks,
    Blocks,
    Ping,
    Pong,
}

/// The outer JSON envelope carried by every connection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct Envelope {
    command: Command,
    payload: Vec<u8>,
    from_port: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VersionPayload {
    pub version: u32,
    pub block_height: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TransactionsPayload {
    pub transactions: Vec<Transaction>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GetBlocksPayload {
    /// Anchor block hash; empty means "send everything".
    pub from_block_hash: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BlocksPayload {
    pub blocks: Vec<Block>,
}

/// Commands whose payload is an empty object.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct EmptyPayload {}

/// A decoded wire message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    GetTransactions,
    Transactions(TransactionsPayload),
    GetBlocks(GetBlocksPayload),
    Blocks(BlocksPayload),
    Ping,
    Pong,
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Version(_) => Command::Version,
            Message::GetTransactions => Command::GetTransactions,
            Message::Transactions(_) => Command::Transactions,
            Message::GetBlocks(_) => Command::GetBlocks,
            Message::Blocks(_) => Command::Blocks,
            Message::Ping => Command::Ping,
            Message::Pong => Command::Pong,
        }
    }

    /// Encode this message into envelope bytes, stamping the sender's
    /// listening port.
    pub fn encode(&self, from_port: u16) -> Result<Vec<u8>, NetError> {
        let payload = match self {
            Message::Version(p) => to_payload(p)?,
            Message::Transactions(p) => to_payload(p)?,
            Message::GetBlocks(p) => to_payload(p)?,
            Message::Blocks(p) => to_payload(p)?,
            Message::GetTransactions | Message::Ping | Message::Pong => {
                to_payload(&EmptyPayload {})?
            }
        };
        let envelope = Envelope {
            command: self.command(),
            payload,
            from_port: u32::from(from_port),
        };
        let bytes =
            serde_json::to_vec(&envelope).map_err(|e| NetError::Malformed(e.to_string()))?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::MessageTooLarge { size: bytes.len() });
        }
        Ok(bytes)
    }

    /// Decode envelope bytes into a message plus the sender's advertised
    /// listening port.
    pub fn decode(data: &[u8]) -> Result<(Self, u16), NetError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::MessageTooLarge { size: data.len() });
        }
        let envelope: Envelope =
            serde_json::from_slice(data).map_err(|e| NetError::Malformed(e.to_string()))?;
        let from_port = u16::try_from(envelope.from_port)
            .map_err(|_| NetError::Malformed(format!("port {} out of range", envelope.from_port)))?;
        let message = match envelope.command {
            Command::Version => Message::Version(from_payload(&envelope.payload)?),
            Command::Transactions => Message::Transactions(from_payload(&envelope.payload)?),
            Command::GetBlocks => Message::GetBlocks(from_payload(&envelope.payload)?),
            Command::Blocks => Message::Blocks(from_payload(&envelope.payload)?),
            Command::GetTransactions => {
                let _: EmptyPayload = from_payload(&envelope.payload)?;
                Message::GetTransactions
            }
            Command::Ping => {
                let _: EmptyPayload = from_payload(&envelope.payload)?;
                Message::Ping
            }
            Command::Pong => {
                let _: EmptyPayload = from_payload(&envelope.payload)?;
                Message::Pong
            }
        };
        Ok((message, from_port))
    }
}

fn to_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>, NetError> {
    serde_json::to_vec(payload).map_err(|e| NetError::Malformed(e.to_string()))
}

fn from_payload<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T, NetError> {
    serde_json::from_slice(bytes).map_err(|e| NetError::Malformed(e.to_string()))
}
