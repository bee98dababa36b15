//! Peer directory.
//!
//! The set of pods this node knows about, indexed by address. Owned by the
//! node and shared by reference with the orchestrator and the channel
//! server; created at node start and cleared on wipe.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use podnet_ledger::Address;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::pod::{Pod, PodRole};

/// Registry of known pods.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    pods: RwLock<HashMap<Address, Pod>>,
}

impl PeerDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a pod. Returns true if the pod was not known before.
    pub fn upsert(&self, pod: Pod) -> bool {
        let mut pods = self.pods.write().unwrap_or_else(PoisonError::into_inner);
        match pods.get_mut(&pod.address) {
            Some(existing) => {
                existing.location = pod.location;
                existing.role = pod.role;
                existing.online = pod.online;
                false
            }
            None => {
                info!(
                    address = %pod.address.short(),
                    location = %pod.location,
                    role = %pod.role,
                    "Pod joined"
                );
                pods.insert(pod.address.clone(), pod);
                true
            }
        }
    }

    /// Remove a pod on disconnection.
    pub fn remove(&self, address: &Address) -> Option<Pod> {
        let removed = self
            .pods
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);
        if removed.is_some() {
            info!(address = %address.short(), "Pod left");
        }
        removed
    }

    /// Flip a pod's liveness flag.
    pub fn set_online(&self, address: &Address, online: bool) -> Result<()> {
        let mut pods = self.pods.write().unwrap_or_else(PoisonError::into_inner);
        let pod = pods
            .get_mut(address)
            .ok_or_else(|| Error::UnknownPod(address.to_string()))?;
        pod.online = online;
        debug!(address = %address.short(), online, "Pod liveness changed");
        Ok(())
    }

    /// Look up a pod by address.
    pub fn get(&self, address: &Address) -> Option<Pod> {
        self.pods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }

    /// Online pods with the given role, ordered by address.
    pub fn list_by_role(&self, role: PodRole) -> Vec<Pod> {
        let pods = self.pods.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = pods
            .values()
            .filter(|p| p.role == role && p.online)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.address.cmp(&b.address));
        out
    }

    /// Every known pod, ordered by address.
    pub fn all(&self) -> Vec<Pod> {
        let pods = self.pods.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = pods.values().cloned().collect();
        out.sort_by(|a, b| a.address.cmp(&b.address));
        out
    }

    /// Number of known pods.
    pub fn len(&self) -> usize {
        self.pods.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every pod.
    pub fn clear(&self) {
        self.pods.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
