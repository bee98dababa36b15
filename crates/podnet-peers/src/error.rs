//! Error types for podnet-peers.

use thiserror::Error;

use crate::pod::PodRole;

/// Result type for peer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the peer directory and sampler.
#[derive(Debug, Error)]
pub enum Error {
    /// The pool cannot supply the requested number of distinct non-self pods.
    #[error("insufficient {role} candidates: requested {requested}, available {available}")]
    InsufficientCandidates {
        role: PodRole,
        requested: usize,
        available: usize,
    },

    /// No pod with this address is registered.
    #[error("unknown pod: {0}")]
    UnknownPod(String),

    /// Role string did not parse.
    #[error("invalid pod role: {0}")]
    InvalidRole(String),
}
