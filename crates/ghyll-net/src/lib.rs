//! # ghyll-net
//! Wire protocol codec and TCP transport for the Ghyll gossip network.

pub mod codec;
pub mod transport;

pub use codec::{
    BlocksPayload, Command, GetBlocksPayload, Message, TransactionsPayload, VersionPayload,
};
pub use transport::{MessageHandler, TcpTransport};
