//! Error types for podnet-protocols.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Result type for podnet-protocols operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to peers or running validation.
#[derive(Debug, Error)]
pub enum Error {
    /// Transaction model or ledger failure.
    #[error(transparent)]
    Ledger(#[from] podnet_ledger::Error),

    /// Peer directory or sampling failure.
    #[error(transparent)]
    Peers(#[from] podnet_peers::Error),

    /// No response within the bounded interval.
    #[error("connection timeout: no response from {location} within {timeout:?}")]
    ConnectionTimeout {
        location: SocketAddr,
        timeout: Duration,
    },

    /// The peer closed the connection before answering.
    #[error("connection to {0} closed before a response arrived")]
    ConnectionClosed(SocketAddr),

    /// The peer answered with a message of the wrong type.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// This node can only originate transactions from its own wallet.
    #[error("transaction sender {0} is not this node's wallet")]
    ForeignSender(String),

    /// A frame exceeded the maximum size.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
