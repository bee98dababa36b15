//! Pod node: owns the node's state and serves the peer channel.
//!
//! Architecture:
//! - One [`Orchestrator`] holding the wallet, peer directory and ledger store
//! - One TCP listener for peers and for the `pod-admin` CLI, both speaking
//!   the same line-delimited JSON messages
//! - Bootstrap: `HELLO` to the configured peers, then to every pod learned

use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::join_all;
use podnet_ledger::{Address, LedgerStore, Wallet};
use podnet_peers::{PeerDirectory, Pod, PodRole};
use podnet_protocols::{
    serve, EventType, LogEvent, Message, MessageHandler, Orchestrator, ProtocolConfig,
    TelemetrySink, TracingSink,
};
use tokio::net::{lookup_host, TcpListener};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};

/// Answers peer and admin messages for one node.
#[derive(Debug)]
pub struct PodService {
    orchestrator: Arc<Orchestrator>,
    role: PodRole,
}

impl PodService {
    pub fn new(orchestrator: Arc<Orchestrator>, role: PodRole) -> Self {
        Self { orchestrator, role }
    }

    pub fn address(&self) -> &Address {
        self.orchestrator.address()
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        self.orchestrator.directory()
    }

    pub fn ledgers(&self) -> &Arc<LedgerStore> {
        self.orchestrator.ledgers()
    }

    /// This node's own directory entry, once registered.
    pub fn pod(&self) -> Option<Pod> {
        self.directory().get(self.address())
    }

    /// Publish this node at `location`.
    pub fn register(&self, location: SocketAddr) -> Pod {
        let pod = Pod::new(self.address().clone(), location, self.role);
        self.directory().upsert(pod.clone());
        self.ledgers().bootstrap(self.address());
        pod
    }

    /// Learn about a pod: add it to the directory and bootstrap its genesis
    /// ledger. Our own entry is never overwritten by peers.
    pub fn welcome(&self, pod: Pod) {
        if &pod.address == self.address() {
            return;
        }
        let event = LogEvent::new(EventType::PodJoined, &pod.address).connection_to(pod.location);
        self.ledgers().bootstrap(&pod.address);
        if self.directory().upsert(pod) {
            self.orchestrator.telemetry().emit(event);
        }
    }

    fn farewell(&self, address: &Address) {
        if let Some(pod) = self.directory().remove(address) {
            self.orchestrator.telemetry().emit(
                LogEvent::new(EventType::PodLeft, &pod.address).connection_to(pod.location),
            );
        }
    }

    fn others(&self) -> Vec<Pod> {
        self.directory()
            .all()
            .into_iter()
            .filter(|p| &p.address != self.address())
            .collect()
    }

    /// Say `HELLO` to each bootstrap peer, then to every pod learned from
    /// them. Returns how many bootstrap peers answered.
    pub async fn join(&self, bootstrap_peers: &[String]) -> usize {
        let Some(me) = self.pod() else {
            warn!("Cannot join before the node is bound");
            return 0;
        };
        let hello = Message::Hello { pod: me };
        let channel = self.orchestrator.channel();

        let mut reached = 0;
        for peer in bootstrap_peers {
            let location = match resolve(peer).await {
                Ok(location) => location,
                Err(e) => {
                    warn!("Failed to resolve bootstrap peer {}: {}", peer, e);
                    continue;
                }
            };
            match channel.request(location, &hello).await {
                Ok(Message::Peers { pods }) => {
                    info!(peer = %peer, known = pods.len(), "Connected to bootstrap peer");
                    reached += 1;
                    pods.into_iter().for_each(|pod| self.welcome(pod));
                }
                Ok(other) => warn!(peer = %peer, "Unexpected reply to HELLO: {}", other.kind()),
                Err(e) => warn!(peer = %peer, "Bootstrap peer unreachable: {}", e),
            }
        }

        // Announce ourselves to everyone we now know about.
        let announcements = self.others().into_iter().map(|pod| {
            let hello = &hello;
            async move {
                let reply = channel.request(pod.location, hello).await;
                (pod, reply)
            }
        });
        for (pod, reply) in join_all(announcements).await {
            match reply {
                Ok(Message::Peers { pods }) => pods.into_iter().for_each(|pod| self.welcome(pod)),
                Ok(other) => debug!(location = %pod.location, "Unexpected reply to HELLO: {}", other.kind()),
                Err(e) => {
                    // Unreachable pods stay known but are not sampled.
                    debug!(location = %pod.location, "Announcement failed: {}", e);
                    if let Err(e) = self.directory().set_online(&pod.address, false) {
                        debug!(location = %pod.location, "Could not mark pod offline: {}", e);
                    }
                }
            }
        }

        info!(peers = self.directory().len(), "Joined network");
        reached
    }

    /// Tell every known pod this node is leaving.
    pub async fn leave(&self) {
        let message = Message::Goodbye {
            address: self.address().clone(),
        };
        let locations = self.others().into_iter().map(|p| p.location);
        let delivered = self.orchestrator.channel().broadcast(locations, &message).await;
        info!(delivered, "Sent goodbye");
    }

    /// Forget all ledgers, witness records and peers, keeping only this
    /// node's own genesis ledger and directory entry.
    pub fn wipe(&self) {
        let me = self.pod();
        self.ledgers().wipe();
        self.directory().clear();
        if let Some(me) = me {
            self.directory().upsert(me);
        }
        self.ledgers().bootstrap(self.address());
        info!("Node state wiped");
    }

    fn balance(&self, address: Address) -> Message {
        let (balance, entries) = match self.ledgers().ledger(&address) {
            Some(ledger) => (ledger.balance(&address), ledger.len()),
            None => (0, 0),
        };
        let balance = i64::try_from(balance).unwrap_or(if balance < 0 { i64::MIN } else { i64::MAX });
        Message::Balance {
            address,
            balance,
            entries,
        }
    }
}

impl MessageHandler for PodService {
    async fn handle(&self, from: SocketAddr, message: Message) -> Message {
        debug!(%from, kind = message.kind(), "Handling message");
        match message {
            Message::RequestValidateTransaction {
                transaction,
                sender_ledger,
            } => Message::TransactionConfirmationResult(
                self.orchestrator
                    .handle_validation_request(transaction, sender_ledger)
                    .await,
            ),
            Message::QueryTransactionHashValid { id, hash } => {
                Message::TransactionConfirmationResult(self.orchestrator.handle_hash_query(&id, &hash))
            }
            Message::TransactionVerdict { id, accepted } => {
                self.orchestrator.handle_verdict(&id, accepted).await;
                Message::Ack
            }
            Message::Hello { pod } => {
                self.welcome(pod);
                Message::Peers {
                    pods: self.directory().all(),
                }
            }
            Message::Goodbye { address } => {
                self.farewell(&address);
                Message::Ack
            }
            Message::QueryPeers => Message::Peers {
                pods: self.directory().all(),
            },
            Message::SubmitTransaction { address, amount } => {
                match self.orchestrator.submit(address, amount).await {
                    Ok(verdict) => Message::TransactionConfirmationResult(verdict.result),
                    Err(e) => Message::error(e),
                }
            }
            Message::QueryBalance { address } => self.balance(address),
            Message::Wipe => {
                self.wipe();
                Message::Ack
            }
            Message::Ping => Message::Pong,
            other => Message::error(format!("unexpected message: {}", other.kind())),
        }
    }
}

async fn resolve(peer: &str) -> Result<SocketAddr> {
    lookup_host(peer)
        .await?
        .next()
        .ok_or_else(|| Error::Config(format!("no address for {}", peer)))
}

/// A pod node instance.
pub struct PodNode {
    config: NodeConfig,
    service: Arc<PodService>,
    listener: Option<TcpListener>,
}

impl PodNode {
    /// Create a node with the default tracing telemetry sink.
    pub fn new(config: NodeConfig) -> Result<Self> {
        Self::with_telemetry(config, Arc::new(TracingSink))
    }

    /// Create a node emitting telemetry to `sink`.
    pub fn with_telemetry(config: NodeConfig, sink: Arc<dyn TelemetrySink>) -> Result<Self> {
        let wallet = match &config.wallet_seed {
            Some(seed) => Wallet::from_hex_seed(seed)?,
            None => Wallet::generate(),
        };
        let ledgers = Arc::new(LedgerStore::new());
        ledgers.bootstrap(wallet.public_key());

        let protocol = ProtocolConfig::default().with_request_timeout(config.request_timeout);
        let orchestrator = Orchestrator::new(wallet, Arc::new(PeerDirectory::new()), ledgers, protocol)
            .with_telemetry(sink);
        let service = Arc::new(PodService::new(Arc::new(orchestrator), config.role));

        Ok(Self {
            config,
            service,
            listener: None,
        })
    }

    pub fn address(&self) -> &Address {
        self.service.address()
    }

    /// Shared handle to the node's state.
    pub fn service(&self) -> Arc<PodService> {
        Arc::clone(&self.service)
    }

    /// Bind the listener and publish this node's location. Returns the
    /// bound address.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let listener = self.open_listener().await?;
        let local = listener.local_addr()?;
        self.listener = Some(listener);
        Ok(local)
    }

    async fn open_listener(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.config.p2p_addr).await?;
        let local = listener.local_addr()?;
        let location = self.config.advertise_addr.unwrap_or(local);
        if location.ip().is_unspecified() {
            warn!(%location, "Advertising an unspecified address; set POD_ADVERTISE_ADDR");
        }
        self.service.register(location);
        Ok(listener)
    }

    /// Start serving in the background and join the network.
    pub async fn start(mut self) -> Result<RunningNode> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => self.open_listener().await?,
        };
        let local_addr = listener.local_addr()?;

        info!("Pod node starting");
        info!("  Address: {}", self.address());
        info!("  Role: {}", self.config.role);
        info!("  P2P: {}", local_addr);

        let server = tokio::spawn(serve(listener, Arc::clone(&self.service)));
        self.service.join(&self.config.bootstrap_peers).await;

        Ok(RunningNode {
            service: self.service,
            local_addr,
            server,
        })
    }

    /// Run until interrupted, then say goodbye.
    pub async fn run(self) -> Result<()> {
        let running = self.start().await?;
        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
        running.shutdown().await;
        Ok(())
    }
}

/// A node serving in the background.
#[derive(Debug)]
pub struct RunningNode {
    service: Arc<PodService>,
    local_addr: SocketAddr,
    server: JoinHandle<()>,
}

impl RunningNode {
    pub fn service(&self) -> &Arc<PodService> {
        &self.service
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop serving without telling peers.
    pub async fn stop(self) {
        self.server.abort();
        let _ = self.server.await;
    }

    /// Announce departure, then stop serving.
    pub async fn shutdown(self) {
        self.service.leave().await;
        self.stop().await;
    }
}
