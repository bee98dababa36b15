//! Node configuration.

use std::net::SocketAddr;
use std::time::Duration;

use podnet_ledger::Wallet;
use podnet_peers::PodRole;
use podnet_protocols::DEFAULT_REQUEST_TIMEOUT;

use crate::error::{Error, Result};

/// Configuration for a pod node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Peer channel listen address
    pub p2p_addr: SocketAddr,

    /// Location published to peers (defaults to the bound address)
    pub advertise_addr: Option<SocketAddr>,

    /// Role this pod plays in validator sampling
    pub role: PodRole,

    /// Bootstrap peers (`host:port`)
    pub bootstrap_peers: Vec<String>,

    /// Hex-encoded 32-byte wallet seed; random wallet if unset
    pub wallet_seed: Option<String>,

    /// Bound on each peer request
    pub request_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            p2p_addr: SocketAddr::from(([0, 0, 0, 0], 6001)),
            advertise_addr: None,
            role: PodRole::Regular,
            bootstrap_peers: Vec::new(),
            wallet_seed: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let p2p_addr = match lookup("POD_P2P_ADDR") {
            Some(v) => parse_addr("POD_P2P_ADDR", &v)?,
            None => defaults.p2p_addr,
        };

        let advertise_addr = lookup("POD_ADVERTISE_ADDR")
            .map(|v| parse_addr("POD_ADVERTISE_ADDR", &v))
            .transpose()?;

        let role = match lookup("POD_ROLE") {
            Some(v) => v
                .parse()
                .map_err(|e| Error::Config(format!("POD_ROLE: {}", e)))?,
            None => defaults.role,
        };

        let bootstrap_peers = lookup("POD_BOOTSTRAP_PEERS")
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let wallet_seed = match lookup("POD_WALLET_SEED") {
            Some(seed) => {
                Wallet::from_hex_seed(&seed)
                    .map_err(|e| Error::Config(format!("POD_WALLET_SEED: {}", e)))?;
                Some(seed)
            }
            None => None,
        };

        let request_timeout = match lookup("POD_REQUEST_TIMEOUT_MS") {
            Some(v) => {
                let ms: u64 = v
                    .trim()
                    .parse()
                    .map_err(|_| Error::Config(format!("POD_REQUEST_TIMEOUT_MS: not a number: {}", v)))?;
                if ms == 0 {
                    return Err(Error::Config("POD_REQUEST_TIMEOUT_MS must be positive".into()));
                }
                Duration::from_millis(ms)
            }
            None => defaults.request_timeout,
        };

        Ok(Self {
            p2p_addr,
            advertise_addr,
            role,
            bootstrap_peers,
            wallet_seed,
            request_timeout,
        })
    }

    /// Loopback config on an ephemeral port.
    #[must_use]
    pub fn local() -> Self {
        Self {
            p2p_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: PodRole) -> Self {
        self.role = role;
        self
    }

    #[must_use]
    pub fn with_bootstrap_peers(mut self, peers: Vec<String>) -> Self {
        self.bootstrap_peers = peers;
        self
    }

    #[must_use]
    pub fn with_wallet_seed(mut self, seed: impl Into<String>) -> Self {
        self.wallet_seed = Some(seed.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn parse_addr(key: &str, value: &str) -> Result<SocketAddr> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{}: invalid socket address: {}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = NodeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.p2p_addr, "0.0.0.0:6001".parse().unwrap());
        assert_eq!(config.role, PodRole::Regular);
        assert!(config.bootstrap_peers.is_empty());
        assert!(config.wallet_seed.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn reads_every_variable() {
        let seed = "07".repeat(32);
        let config = NodeConfig::from_lookup(lookup(&[
            ("POD_P2P_ADDR", "127.0.0.1:7000"),
            ("POD_ADVERTISE_ADDR", "10.0.0.5:7000"),
            ("POD_ROLE", "Partner"),
            ("POD_BOOTSTRAP_PEERS", "pod-1:6001, pod-2:6001,,"),
            ("POD_WALLET_SEED", &seed),
            ("POD_REQUEST_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.p2p_addr, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.advertise_addr, Some("10.0.0.5:7000".parse().unwrap()));
        assert_eq!(config.role, PodRole::Partner);
        assert_eq!(config.bootstrap_peers, vec!["pod-1:6001", "pod-2:6001"]);
        assert_eq!(config.wallet_seed.as_deref(), Some(seed.as_str()));
        assert_eq!(config.request_timeout, Duration::from_millis(250));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for vars in [
            [("POD_P2P_ADDR", "not-an-addr")],
            [("POD_ROLE", "king")],
            [("POD_WALLET_SEED", "abc")],
            [("POD_REQUEST_TIMEOUT_MS", "soon")],
            [("POD_REQUEST_TIMEOUT_MS", "0")],
        ] {
            let err = NodeConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{:?}", vars);
        }
    }
}
