//! Node wallet.
//!
//! Holds the ed25519 signing key of this pod. The public half is the pod's
//! account [`Address`]; the private half never leaves the wallet.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};

use crate::address::Address;
use crate::error::{Error, Result};

/// A pod's key pair.
#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Generate a fresh random wallet.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self::from_signing_key(SigningKey::generate(&mut rng))
    }

    /// Deterministic wallet from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    /// Wallet from a hex-encoded 32-byte seed.
    pub fn from_hex_seed(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Crypto("wallet seed must be 32 bytes".to_string()))?;
        Ok(Self::from_seed(&seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::from_verifying_key(&signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// The account address (public key) of this wallet.
    pub fn public_key(&self) -> &Address {
        &self.address
    }

    /// Sign a message, returning the hex-encoded signature.
    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Verify a hex-encoded signature over `message` with the key behind `address`.
///
/// Malformed key or signature material is an error; a well-formed signature
/// that does not match returns `Ok(false)`.
pub fn verify(address: &Address, message: &[u8], signature_hex: &str) -> Result<bool> {
    let key = address.verifying_key()?;
    let bytes = hex::decode(signature_hex)?;
    let arr: [u8; 64] = bytes
        .try_into()
        .map_err(|_| Error::Crypto("signature must be 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&arr);
    Ok(key.verify(message, &signature).is_ok())
}
