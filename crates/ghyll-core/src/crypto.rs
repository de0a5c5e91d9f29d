//! ECDSA (secp256k1) operations for the Ghyll protocol.
//!
//! Wraps `k256` for key handling, signing, and verification. Addresses are
//! the double SHA-256 of the SEC1 uncompressed public-key bytes.
//!
//! # Signing scheme
//!
//! Each transaction input signs the 32-byte **outpoint hash** — the hash of
//! the transaction whose output it spends. An input verifies iff the
//! signature verifies over that hash under the input's public key and the
//! public key's address equals the referenced output's address.
//!
//! Signatures produced here are deterministic (RFC 6979); verification also
//! accepts nondeterministic signatures from other implementations.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use std::fmt;

use crate::error::CryptoError;
use crate::types::{Address, TxInput, double_sha256};

/// ECDSA keypair for signing transaction inputs.
///
/// Use [`KeyPair::generate`] for random keys or
/// [`KeyPair::from_secret_bytes`] to restore one from stored key material.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self { signing_key: SigningKey::random(&mut csprng) }
    }

    /// Restore a keypair from 32-byte secret scalar material.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey { verifying_key: *self.signing_key.verifying_key() }
    }

    /// The owner address: double SHA-256 of the public-key bytes.
    pub fn address(&self) -> Address {
        self.public_key().address()
    }

    /// Raw secret scalar bytes. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// Sign a message, returning the fixed-width 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signature: Signature = self.signing_key.sign(message);
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(&signature.to_bytes());
        bytes
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self { signing_key: self.signing_key.clone() }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// ECDSA public key for verifying signatures and deriving addresses.
#[derive(Clone, Copy)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    /// Parse a public key from SEC1 bytes (compressed or uncompressed).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key })
    }

    /// SEC1 uncompressed public-key bytes (65 bytes, deterministic).
    pub fn to_bytes(&self) -> Vec<u8> {
        self.verifying_key.to_encoded_point(false).as_bytes().to_vec()
    }

    /// The address derived from this key.
    pub fn address(&self) -> Address {
        address_from_public_key(&self.to_bytes())
    }

    /// Verify an ECDSA signature on a message.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature =
            Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
        self.verifying_key
            .verify(message, &signature)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.verifying_key == other.verifying_key
    }
}

impl Eq for PublicKey {}

/// The address for raw public-key bytes: SHA-256 applied twice.
pub fn address_from_public_key(public_key_bytes: &[u8]) -> Address {
    double_sha256(public_key_bytes)
}

/// Verify a transaction input against the output it spends.
///
/// Checks that the input's public key hashes to `expected_address` (the
/// referenced UTXO's owner) and that the signature verifies over the
/// outpoint hash.
pub fn verify_input(input: &TxInput, expected_address: &Address) -> Result<(), CryptoError> {
    if address_from_public_key(&input.public_key) != *expected_address {
        return Err(CryptoError::AddressMismatch);
    }
    let public_key = PublicKey::from_sec1_bytes(&input.public_key)?;
    public_key.verify(input.previous_output.hash.as_bytes(), &input.signature)
}
