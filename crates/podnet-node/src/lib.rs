//! Pod Node
//!
//! A node of the pod test network. Each node holds a wallet, knows its
//! peers by role, keeps a copy of the account ledgers it has seen and takes
//! part in validating other nodes' transactions as a witness or partner.
//!
//! Configuration comes from `POD_*` environment variables, see
//! [`NodeConfig::from_env`].

pub mod config;
pub mod error;
pub mod node;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::{PodNode, PodService, RunningNode};
