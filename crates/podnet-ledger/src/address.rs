//! Account addresses.
//!
//! An address is the hex-encoded ed25519 verifying key of a wallet, prefixed
//! with `ed`. It doubles as the account id and as the key used to verify the
//! signatures of transactions sent from that account.
//!
//! ```text
//! ed 3b6a27bcceb6a42d62a3a8d02a6f0d73653215771de243a63ac048a18b59da29
//! ^^ ^--------------------- 64 hex chars (32 bytes) ------------------^
//! ```

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Required address prefix.
pub const ADDRESS_PREFIX: &str = "ed";

/// Total address length in characters (prefix + 32 hex-encoded bytes).
pub const ADDRESS_LEN: usize = ADDRESS_PREFIX.len() + 64;

/// A structurally valid account address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and validate an address string.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != ADDRESS_LEN {
            return Err(Error::InvalidAddress(format!(
                "expected {} characters, got {}",
                ADDRESS_LEN,
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidAddress(
                "address must contain only hex characters".to_string(),
            ));
        }
        if !s[..ADDRESS_PREFIX.len()].eq_ignore_ascii_case(ADDRESS_PREFIX) {
            return Err(Error::InvalidAddress(format!(
                "address must start with {}",
                ADDRESS_PREFIX
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Derive the address of a verifying key.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self(format!("{}{}", ADDRESS_PREFIX, hex::encode(key.as_bytes())))
    }

    /// Decode the verifying key this address encodes.
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        let bytes = hex::decode(&self.0[ADDRESS_PREFIX.len()..])?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Crypto("verifying key must be 32 bytes".to_string()))?;
        Ok(VerifyingKey::from_bytes(&arr)?)
    }

    /// The full address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..ADDRESS_PREFIX.len() + 8]
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}
