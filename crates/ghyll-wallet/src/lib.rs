//! # ghyll-wallet
//! Named keypair storage and the signing wallet.

pub mod error;
pub mod keystore;
pub mod wallet;

pub use error::WalletError;
pub use keystore::Keystore;
pub use wallet::Wallet;
