//! A wallet: one keypair plus its derived address.
//!
//! The wallet signs transaction inputs — the signed message is always the
//! 32-byte outpoint hash of the UTXO being spent — and can verify its own
//! work as defense in depth before a transaction leaves the node.

use ghyll_core::crypto::{KeyPair, verify_input};
use ghyll_core::error::CryptoError;
use ghyll_core::types::{Address, OutPoint, TxInput, Utxo};

/// A single-key wallet.
#[derive(Clone, Debug)]
pub struct Wallet {
    keypair: KeyPair,
    address: Address,
}

impl Wallet {
    pub fn new(keypair: KeyPair) -> Self {
        let address = keypair.address();
        Self { keypair, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.keypair.public_key().to_bytes()
    }

    /// Build a signed input spending `utxo`.
    pub fn sign_utxo(&self, utxo: &Utxo) -> TxInput {
        let outpoint = utxo.outpoint();
        let signature = self.keypair.sign(outpoint.hash.as_bytes());
        TxInput {
            previous_output: outpoint,
            public_key: self.public_key_bytes(),
            signature: signature.to_vec(),
        }
    }

    /// Can this wallet unlock `utxo`? True iff the wallet's key signs a
    /// valid input for it.
    pub fn can_unlock(&self, utxo: &Utxo) -> bool {
        let input = self.sign_utxo(utxo);
        verify_input(&input, &utxo.address).is_ok()
    }

    /// Re-verify an input this wallet produced (defense in depth).
    pub fn verify_own_input(&self, input: &TxInput) -> Result<(), CryptoError> {
        verify_input(input, &self.address)
    }

    /// Sign an arbitrary outpoint directly.
    pub fn sign_outpoint(&self, outpoint: &OutPoint) -> Vec<u8> {
        self.keypair.sign(outpoint.hash.as_bytes()).to_vec()
    }
}
