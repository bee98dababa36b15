//! Error types for podnet-ledger.

use thiserror::Error;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the transaction model and ledger store.
#[derive(Debug, Error)]
pub enum Error {
    /// Address failed the structural checks (length, hex, prefix).
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Key or signature material could not be decoded or used.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The stored id does not match the id recomputed from the stored fields.
    #[error("invalid transaction id: expected {expected}, got {got}")]
    InvalidTransactionId { expected: String, got: String },

    /// The signature over the transaction id does not verify against `from`.
    #[error("invalid transaction signature for {id}")]
    InvalidSignature { id: String },

    /// Genesis-only account asked to spend at least its whole genesis credit.
    #[error("insufficient genesis funds: holdings {genesis}, transaction amount {amount}")]
    InsufficientGenesisFunds { genesis: u64, amount: u64 },

    /// Sender balance is below the transaction amount.
    #[error("insufficient funds: holdings {holdings}, transaction amount {amount}")]
    InsufficientFunds { holdings: i128, amount: u64 },

    /// A recursive check referenced an id this node has no record of.
    #[error("ledger entry not found: {0}")]
    LedgerEntryNotFound(String),

    /// Validator fields are write-once.
    #[error("validators already assigned to transaction {0}")]
    ValidatorsAlreadyAssigned(String),
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(e: ed25519_dalek::SignatureError) -> Self {
        Error::Crypto(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Crypto(e.to_string())
    }
}
