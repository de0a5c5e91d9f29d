//! Wallet error types.

use ghyll_core::error::CryptoError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Key file exists but does not decode to a valid secret key.
    #[error("corrupted key file: {0}")]
    CorruptedKeyFile(String),

    /// Key names are restricted to a filename-safe alphabet.
    #[error("invalid key name: {0}")]
    InvalidKeyName(String),

    /// I/O error reading or writing the keystore directory.
    #[error("io: {0}")]
    Io(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_corrupted_file() {
        let e = WalletError::CorruptedKeyFile("bad hex".into());
        assert_eq!(e.to_string(), "corrupted key file: bad hex");
    }

    #[test]
    fn from_crypto_error() {
        let e: WalletError = CryptoError::InvalidSecretKey.into();
        assert_eq!(e, WalletError::Crypto(CryptoError::InvalidSecretKey));
    }
}
