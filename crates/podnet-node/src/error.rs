//! Error types for the pod node.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running a node.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] podnet_protocols::Error),

    /// Ledger error
    #[error(transparent)]
    Ledger(#[from] podnet_ledger::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
