//! Pod Network Peers
//!
//! Who is out there and who gets to validate.
//!
//! - [`PeerDirectory`]: the pods this node knows, by address and role.
//! - [`select_random`]: unbiased, duplicate-free, self-excluding sampling of
//!   validators from a role pool.

pub mod directory;
pub mod error;
pub mod pod;
pub mod sampler;

pub use directory::PeerDirectory;
pub use error::{Error, Result};
pub use pod::{Pod, PodRole};
pub use sampler::{select_random, select_random_with};
