//! Pod identity.

use std::net::SocketAddr;

use podnet_ledger::{now_millis, Address};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Role a pod plays in the network.
///
/// Witnesses are drawn from `Regular` pods and partners from `Partner` pods.
/// `Seed` pods bootstrap discovery; `Dummy` pods are load generators that
/// never validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodRole {
    Regular,
    Partner,
    Seed,
    Dummy,
}

impl std::fmt::Display for PodRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Regular => write!(f, "regular"),
            Self::Partner => write!(f, "partner"),
            Self::Seed => write!(f, "seed"),
            Self::Dummy => write!(f, "dummy"),
        }
    }
}

impl std::str::FromStr for PodRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regular" => Ok(Self::Regular),
            "partner" => Ok(Self::Partner),
            "seed" => Ok(Self::Seed),
            "dummy" => Ok(Self::Dummy),
            other => Err(Error::InvalidRole(other.to_string())),
        }
    }
}

/// A participating node as seen by its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    /// Account address; also the pod's identity.
    pub address: Address,

    /// Published network location of the pod's peer channel.
    pub location: SocketAddr,

    pub role: PodRole,

    /// Liveness flag.
    pub online: bool,

    /// When this pod was first registered (unix millis).
    #[serde(default)]
    pub joined_at: u64,
}

impl Pod {
    /// A new online pod.
    pub fn new(address: Address, location: SocketAddr, role: PodRole) -> Self {
        Self {
            address,
            location,
            role,
            online: true,
            joined_at: now_millis(),
        }
    }
}
