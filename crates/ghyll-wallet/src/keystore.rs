//! File-backed named keystore.
//!
//! Each keypair is stored as lowercase hex secret-scalar material in
//! `<dir>/<name>.key`. The store is intentionally plain: encryption and
//! OS-keychain integration live outside the protocol core.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use ghyll_core::crypto::KeyPair;

use crate::error::WalletError;

/// A directory of named keypairs.
pub struct Keystore {
    dir: PathBuf,
}

impl Keystore {
    /// Open a keystore rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, WalletError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| WalletError::Io(e.to_string()))?;
        Ok(Self { dir })
    }

    /// Generate a fresh keypair under `name`.
    ///
    /// With `persist` the secret material is written to disk and a later
    /// [`load_keypair`](Self::load_keypair) restores it; without, the caller
    /// gets a purely in-memory keypair.
    pub fn generate_keypair(&self, name: &str, persist: bool) -> Result<KeyPair, WalletError> {
        check_name(name)?;
        let keypair = KeyPair::generate();
        if persist {
            let path = self.key_path(name);
            fs::write(&path, hex::encode(keypair.secret_bytes()))
                .map_err(|e| WalletError::Io(e.to_string()))?;
            info!(name, path = %path.display(), "persisted keypair");
        }
        Ok(keypair)
    }

    /// Load the keypair stored under `name`, if any.
    pub fn load_keypair(&self, name: &str) -> Result<Option<KeyPair>, WalletError> {
        check_name(name)?;
        let path = self.key_path(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(WalletError::Io(e.to_string())),
        };
        let bytes = hex::decode(text.trim())
            .map_err(|e| WalletError::CorruptedKeyFile(e.to_string()))?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::CorruptedKeyFile("wrong key length".into()))?;
        let keypair = KeyPair::from_secret_bytes(&secret)?;
        Ok(Some(keypair))
    }

    /// Load the keypair under `name`, generating and persisting one if it
    /// does not exist yet.
    pub fn load_or_generate(&self, name: &str) -> Result<KeyPair, WalletError> {
        match self.load_keypair(name)? {
            Some(keypair) => Ok(keypair),
            None => self.generate_keypair(name, true),
        }
    }

    fn key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.key"))
    }
}

fn check_name(name: &str) -> Result<(), WalletError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(WalletError::InvalidKeyName(name.to_string()))
    }
}
