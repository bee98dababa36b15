//! Validation orchestrator.
//!
//! Runs one validation attempt per transaction through these stages:
//!
//! ```text
//! BUILDING_VALIDATOR_SET ─► ID_AND_SIGNATURE_ASSIGNED ─► LEDGER_RECURSION_IN_FLIGHT
//!                                                              │
//!                                  ACCEPTED / REJECTED ◄── AGGREGATING
//! ```
//!
//! 1. Sample two witnesses (regular pods) and two partners (partner pods).
//! 2. Stamp the timestamp, derive the id, sign it, store the hash.
//! 3. Send `REQUEST_VALIDATE_TRANSACTION` to the four validators. Their
//!    answers are advisory; validators that accept park the transaction
//!    until the verdict arrives.
//! 4. Re-confirm every historical entry of the sender's ledger with the
//!    validators that originally confirmed it (`QUERY_TRANSACTION_HASH_VALID`).
//!    A genesis-only ledger skips this and only checks the genesis amount.
//! 5. Every check must pass, and the sender's balance must cover the amount.
//! 6. On acceptance, append to the sender's and receiver's ledgers. The
//!    verdict goes to the validators as `TRANSACTION_VERDICT`; only an
//!    accepting verdict makes them record the witness and append.
//!
//! Id and signature are checked before anything touches the network. Peer
//! failures become failed [`ValidationResult`]s and reject the transaction;
//! they never abort the node.
//!
//! Attempts are serialized per sender with [`LedgerStore::lock_account`],
//! held from the ledger snapshot until the append.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use podnet_ledger::{
    genesis_transaction, now_millis, Address, Ledger, LedgerStore, Transaction,
    ValidationResult, ValidatorSet, Wallet, GENESIS_AMOUNT,
};
use podnet_peers::{select_random, PeerDirectory, Pod, PodRole};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{PeerChannel, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::telemetry::{EventType, LogEvent, TelemetrySink, TracingSink};

/// Witnesses per transaction, drawn from regular pods.
pub const WITNESS_COUNT: usize = 2;
/// Partners per transaction, drawn from partner pods.
pub const PARTNER_COUNT: usize = 2;

/// Protocol constants.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Bound on each validator request.
    pub request_timeout: Duration,
    /// Holdings of a freshly bootstrapped account.
    pub genesis_amount: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            genesis_amount: GENESIS_AMOUNT,
        }
    }
}

impl ProtocolConfig {
    /// Set the validator request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Stage of a validation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStage {
    BuildingValidatorSet,
    IdAndSignatureAssigned,
    LedgerRecursionInFlight,
    Aggregating,
    Accepted,
    Rejected,
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BuildingValidatorSet => "BUILDING_VALIDATOR_SET",
            Self::IdAndSignatureAssigned => "ID_AND_SIGNATURE_ASSIGNED",
            Self::LedgerRecursionInFlight => "LEDGER_RECURSION_IN_FLIGHT",
            Self::Aggregating => "AGGREGATING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
        })
    }
}

/// Outcome of a full attempt originated by this node.
#[derive(Debug, Clone)]
pub struct Verdict {
    /// Aggregate result, keyed to the transaction id.
    pub result: ValidationResult,
    /// The finalized transaction.
    pub transaction: Transaction,
    /// Answers to the direct confirmation requests, in validator order.
    pub confirmations: Vec<ValidationResult>,
    /// Whether the transaction was appended to the local ledgers.
    pub applied: bool,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        self.result.is_success()
    }

    pub fn stage(&self) -> ValidationStage {
        if self.is_accepted() {
            ValidationStage::Accepted
        } else {
            ValidationStage::Rejected
        }
    }
}

/// Drives validation attempts for one node.
pub struct Orchestrator {
    wallet: Wallet,
    directory: Arc<PeerDirectory>,
    ledgers: Arc<LedgerStore>,
    channel: PeerChannel,
    telemetry: Arc<dyn TelemetrySink>,
    config: ProtocolConfig,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("address", self.wallet.public_key())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        wallet: Wallet,
        directory: Arc<PeerDirectory>,
        ledgers: Arc<LedgerStore>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            wallet,
            directory,
            ledgers,
            channel: PeerChannel::new(config.request_timeout),
            telemetry: Arc::new(TracingSink),
            config,
        }
    }

    /// Replace the telemetry sink.
    #[must_use]
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    /// This node's account address.
    pub fn address(&self) -> &Address {
        self.wallet.public_key()
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    pub fn ledgers(&self) -> &Arc<LedgerStore> {
        &self.ledgers
    }

    pub fn channel(&self) -> &PeerChannel {
        &self.channel
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetrySink> {
        &self.telemetry
    }

    fn event(&self, kind: EventType) -> LogEvent {
        LogEvent::new(kind, self.wallet.public_key())
    }

    fn emit(&self, event: LogEvent) {
        self.telemetry.emit(event);
    }

    /// Send `amount` from this node's wallet to `to`, running the full
    /// protocol. Errors only when no validator set can be built.
    pub async fn submit(&self, to: Address, amount: u64) -> Result<Verdict> {
        let me = self.address().clone();
        let _guard = self.ledgers.lock_account(&me).await;

        self.ledgers.bootstrap(&me);
        let sender_ledger = self.ledgers.ledger(&me).unwrap_or_default();
        let tx = Transaction::new(me, to, amount, now_millis());
        self.execute(tx, sender_ledger).await
    }

    /// Start an attempt in the background. The verdict surfaces through the
    /// returned handle.
    pub fn request_validate_transaction(
        self: &Arc<Self>,
        transaction: Transaction,
        sender_ledger: Ledger,
    ) -> JoinHandle<Result<Verdict>> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = this.ledgers.lock_account(&transaction.from).await;
            this.execute(transaction, sender_ledger).await
        })
    }

    /// Steps 1 to 6 for a transaction originated here. Caller holds the
    /// sender's account lock.
    async fn execute(&self, mut tx: Transaction, sender_ledger: Ledger) -> Result<Verdict> {
        self.emit(
            self.event(EventType::TransactionStart)
                .parties(&tx.from, &tx.address)
                .ledger_length(sender_ledger.len()),
        );

        let validators = self.prepare(&mut tx)?;
        let confirmations = self.request_confirmations(&tx, &sender_ledger, &validators).await;
        let mut result = self.validate_transaction(&tx, &sender_ledger).await;

        let mut applied = false;
        if result.is_success() {
            match self.apply(&tx, &sender_ledger) {
                Ok(done) => applied = done,
                Err(e) => result = ValidationResult::failure(&tx.id, e),
            }
        }
        self.announce_verdict(&tx.id, result.is_success(), &validators).await;

        self.emit(self.event(EventType::TransactionEnd).transaction(&tx.id));
        let verdict = Verdict {
            result,
            transaction: tx,
            confirmations,
            applied,
        };
        info!(
            id = %verdict.transaction.id,
            to = %verdict.transaction.address.short(),
            amount = verdict.transaction.amount,
            verdict = %verdict.stage(),
            reason = %verdict.result.reason,
            "Transaction validated"
        );
        Ok(verdict)
    }

    /// Sample the validator set: two regular pods and two partner pods, never
    /// this node.
    pub fn build_validator_set(&self) -> Result<(ValidatorSet, Vec<Pod>)> {
        self.emit(self.event(EventType::SelectRandomPodsStart));
        let me = self.address();
        let witnesses = select_random(
            &self.directory.list_by_role(PodRole::Regular),
            WITNESS_COUNT,
            me,
            PodRole::Regular,
        )?;
        let partners = select_random(
            &self.directory.list_by_role(PodRole::Partner),
            PARTNER_COUNT,
            me,
            PodRole::Partner,
        )?;
        self.emit(self.event(EventType::SelectRandomPodsEnd));

        let [w1, w2] = exact::<WITNESS_COUNT>(witnesses, PodRole::Regular)?;
        let [p1, p2] = exact::<PARTNER_COUNT>(partners, PodRole::Partner)?;
        let set = ValidatorSet {
            witnesses: [w1.address.clone(), w2.address.clone()],
            partners: [p1.address.clone(), p2.address.clone()],
        };
        Ok((set, vec![w1, w2, p1, p2]))
    }

    /// Assign validators, then id, signature and hash.
    fn prepare(&self, tx: &mut Transaction) -> Result<Vec<Pod>> {
        if &tx.from != self.address() {
            return Err(Error::ForeignSender(tx.from.to_string()));
        }
        debug!(stage = %ValidationStage::BuildingValidatorSet, "Validation stage");
        let (set, pods) = self.build_validator_set()?;
        tx.assign_validators(&set)?;

        self.emit(self.event(EventType::GenerateTransactionIdStart));
        tx.assign_id();
        self.emit(self.event(EventType::GenerateTransactionIdEnd).transaction(&tx.id));

        self.emit(self.event(EventType::GenerateSignatureStart).transaction(&tx.id));
        tx.sign(&self.wallet);
        self.emit(self.event(EventType::GenerateSignatureEnd).transaction(&tx.id));

        self.emit(self.event(EventType::GenerateTransactionHashStart).transaction(&tx.id));
        tx.generate_hash();
        self.emit(self.event(EventType::GenerateTransactionHashEnd).transaction(&tx.id));

        debug!(id = %tx.id, stage = %ValidationStage::IdAndSignatureAssigned, "Validation stage");
        Ok(pods)
    }

    /// Ask each selected validator to confirm `tx`.
    async fn request_confirmations(
        &self,
        tx: &Transaction,
        sender_ledger: &Ledger,
        validators: &[Pod],
    ) -> Vec<ValidationResult> {
        let message = Message::RequestValidateTransaction {
            transaction: tx.clone(),
            sender_ledger: sender_ledger.clone(),
        };
        let requests = validators.iter().map(|pod| {
            let message = &message;
            async move {
                self.emit(
                    self.event(EventType::ConnectToValidatorStart)
                        .transaction(&tx.id)
                        .validator(&pod.address)
                        .connection_to(pod.location),
                );
                let result = self.confirm(pod, &tx.id, message).await;
                self.emit(
                    self.event(EventType::ConnectToValidatorEnd)
                        .transaction(&tx.id)
                        .validator(&pod.address)
                        .connection_to(pod.location),
                );
                if !result.is_success() {
                    debug!(id = %tx.id, validator = %pod.address.short(), reason = %result.reason, "Validator declined");
                }
                result
            }
        });
        join_all(requests).await
    }

    /// Tell the selected validators whether the attempt was accepted.
    async fn announce_verdict(&self, id: &str, accepted: bool, validators: &[Pod]) {
        let message = Message::TransactionVerdict {
            id: id.to_string(),
            accepted,
        };
        let sends = validators.iter().map(|pod| {
            let message = &message;
            async move { (pod, self.channel.request(pod.location, message).await) }
        });
        for (pod, outcome) in join_all(sends).await {
            if let Err(e) = outcome {
                debug!(id, validator = %pod.address.short(), "Verdict not delivered: {}", e);
            }
        }
    }

    /// Validate `tx` against `sender_ledger`: id, then signature, then the
    /// recursive ledger walk and funds check.
    pub async fn validate_transaction(
        &self,
        tx: &Transaction,
        sender_ledger: &Ledger,
    ) -> ValidationResult {
        self.emit(
            self.event(EventType::RequestValidationStart)
                .transaction(&tx.id)
                .parties(&tx.from, &tx.address),
        );

        let result = match self.check_identity(tx) {
            Ok(()) => self.validate_ledger(tx, sender_ledger).await,
            Err(e) => ValidationResult::failure(&tx.id, e),
        };

        self.emit(self.event(EventType::RequestValidationEnd).transaction(&tx.id));
        let stage = if result.is_success() {
            ValidationStage::Accepted
        } else {
            ValidationStage::Rejected
        };
        debug!(id = %tx.id, %stage, reason = %result.reason, "Validation stage");
        result
    }

    fn check_identity(&self, tx: &Transaction) -> Result<()> {
        tx.check_id()?;

        self.emit(self.event(EventType::ValidateSignatureStart).transaction(&tx.id));
        let checked = tx.check_signature();
        self.emit(self.event(EventType::ValidateSignatureEnd).transaction(&tx.id));
        checked.map_err(Error::from)
    }

    async fn validate_ledger(&self, tx: &Transaction, ledger: &Ledger) -> ValidationResult {
        self.emit(
            self.event(EventType::ValidateLedgerStart)
                .transaction(&tx.id)
                .ledger_length(ledger.len()),
        );
        let result = self.walk_ledger(tx, ledger).await;
        self.emit(
            self.event(EventType::ValidateLedgerEnd)
                .transaction(&tx.id)
                .ledger_length(ledger.len()),
        );
        result
    }

    async fn walk_ledger(&self, tx: &Transaction, ledger: &Ledger) -> ValidationResult {
        if ledger.is_genesis_only() {
            return self.check_genesis_only(tx, &ledger.entries[0]);
        }

        let mut checks = Vec::new();
        for entry in &ledger.entries {
            if entry.is_genesis() {
                if *entry != genesis_transaction(&entry.address) {
                    return ValidationResult::failure(
                        &tx.id,
                        format!("ledger entry {} is not a valid genesis credit", entry.id),
                    );
                }
                continue;
            }
            if !entry.has_validators() {
                return ValidationResult::failure(
                    &tx.id,
                    format!("ledger entry {} has no validators", entry.id),
                );
            }
            for validator in entry.validators() {
                match self.directory.get(validator) {
                    Some(pod) => checks.push(self.confirm_entry(entry, pod)),
                    None => warn!(
                        entry = %entry.id,
                        validator = %validator.short(),
                        "Validator of historical entry is unknown, skipping"
                    ),
                }
            }
        }

        debug!(
            id = %tx.id,
            stage = %ValidationStage::LedgerRecursionInFlight,
            queries = checks.len(),
            "Validation stage"
        );
        let results = join_all(checks).await;

        debug!(id = %tx.id, stage = %ValidationStage::Aggregating, "Validation stage");
        aggregate(tx, ledger, results)
    }

    fn check_genesis_only(&self, tx: &Transaction, entry: &Transaction) -> ValidationResult {
        if *entry != genesis_transaction(&tx.from) {
            return ValidationResult::failure(
                &tx.id,
                format!("ledger entry {} is not the sender's genesis credit", entry.id),
            );
        }
        if tx.amount < self.config.genesis_amount {
            ValidationResult::success(&entry.id, "amount is covered by genesis holdings")
        } else {
            ValidationResult::failure(
                &tx.id,
                podnet_ledger::Error::InsufficientGenesisFunds {
                    genesis: self.config.genesis_amount,
                    amount: tx.amount,
                },
            )
        }
    }

    /// Re-confirm one historical entry with one of its original validators.
    async fn confirm_entry(&self, entry: &Transaction, pod: Pod) -> ValidationResult {
        if &pod.address == self.address() {
            self.emit(self.event(EventType::GetEntryFromLedgerStart).transaction(&entry.id));
            let result = self.ledgers.validate_transaction_hash(&entry.id, &entry.hash);
            self.emit(self.event(EventType::GetEntryFromLedgerEnd).transaction(&entry.id));
            return result;
        }

        self.emit(
            self.event(EventType::ConnectToPreviousValidatorStart)
                .transaction(&entry.id)
                .validator(&pod.address)
                .connection_to(pod.location),
        );
        let message = Message::QueryTransactionHashValid {
            id: entry.id.clone(),
            hash: entry.hash.clone(),
        };
        let result = self.confirm(&pod, &entry.id, &message).await;
        self.emit(
            self.event(EventType::ConnectToPreviousValidatorEnd)
                .transaction(&entry.id)
                .validator(&pod.address)
                .connection_to(pod.location),
        );
        result
    }

    /// One request that must be answered with a confirmation result.
    async fn confirm(&self, pod: &Pod, id: &str, message: &Message) -> ValidationResult {
        match self.channel.request(pod.location, message).await {
            Ok(Message::TransactionConfirmationResult(result)) => result,
            Ok(Message::Error { message }) => ValidationResult::failure(id, message),
            Ok(other) => ValidationResult::failure(id, Error::UnexpectedResponse(other.kind().to_string())),
            Err(e) => ValidationResult::failure(id, e),
        }
    }

    /// Append an accepted transaction originated here.
    fn apply(&self, tx: &Transaction, sender_ledger: &Ledger) -> Result<bool> {
        self.emit(self.event(EventType::WriteToMyLedgerStart).transaction(&tx.id));
        self.ledgers.sync(&tx.from, sender_ledger);
        let applied = self.ledgers.commit(tx);
        self.emit(self.event(EventType::WriteToMyLedgerEnd).transaction(&tx.id));
        applied.map_err(Error::from)
    }

    /// Handle `REQUEST_VALIDATE_TRANSACTION` as a selected validator.
    ///
    /// On acceptance the transaction and the sender ledger it was checked
    /// against are parked until [`handle_verdict`](Self::handle_verdict).
    /// Nothing is written before the originator decides.
    pub async fn handle_validation_request(
        &self,
        transaction: Transaction,
        sender_ledger: Ledger,
    ) -> ValidationResult {
        let _guard = self.ledgers.lock_account(&transaction.from).await;

        let result = self.validate_transaction(&transaction, &sender_ledger).await;
        if result.is_success() {
            self.ledgers.hold_pending(&transaction, &sender_ledger);
        }
        result
    }

    /// Handle `TRANSACTION_VERDICT` for a transaction this node accepted as a
    /// validator. An accepting verdict records the witness, replaces a stale
    /// copy of the sender's ledger with the validated one and appends.
    /// Returns true if the transaction was appended here.
    pub async fn handle_verdict(&self, id: &str, accepted: bool) -> bool {
        let Some((transaction, sender_ledger)) = self.ledgers.take_pending(id) else {
            debug!(id, "Verdict for a transaction not pending here");
            return false;
        };
        if !accepted {
            debug!(id, "Originator rejected transaction, discarding");
            return false;
        }

        let _guard = self.ledgers.lock_account(&transaction.from).await;
        self.emit(self.event(EventType::WriteToWitnessLedgerStart).transaction(id));
        self.ledgers.record_witness(&transaction);
        self.ledgers.sync(&transaction.from, &sender_ledger);
        let applied = match self.ledgers.commit(&transaction) {
            Ok(applied) => applied,
            Err(e) => {
                warn!(id, "Could not append confirmed transaction to local copy: {}", e);
                false
            }
        };
        self.emit(self.event(EventType::WriteToWitnessLedgerEnd).transaction(id));
        applied
    }

    /// Handle `QUERY_TRANSACTION_HASH_VALID`.
    pub fn handle_hash_query(&self, id: &str, hash: &str) -> ValidationResult {
        self.emit(self.event(EventType::GetEntryFromLedgerStart).transaction(id));
        let result = self.ledgers.validate_transaction_hash(id, hash);
        self.emit(self.event(EventType::GetEntryFromLedgerEnd).transaction(id));
        result
    }
}

fn exact<const N: usize>(pods: Vec<Pod>, role: PodRole) -> Result<[Pod; N]> {
    <[Pod; N]>::try_from(pods).map_err(|pods| {
        Error::Peers(podnet_peers::Error::InsufficientCandidates {
            role,
            requested: N,
            available: pods.len(),
        })
    })
}

/// Every check must have passed and the ledger must cover the amount.
fn aggregate(tx: &Transaction, ledger: &Ledger, results: Vec<ValidationResult>) -> ValidationResult {
    if let Some(failed) = results.into_iter().find(|r| !r.is_success()) {
        return ValidationResult::failure(&tx.id, failed.reason);
    }
    let holdings = ledger.balance(&tx.from);
    if holdings < i128::from(tx.amount) {
        return ValidationResult::failure(
            &tx.id,
            podnet_ledger::Error::InsufficientFunds {
                holdings,
                amount: tx.amount,
            },
        );
    }
    ValidationResult::success(&tx.id, "transaction is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{serve, MessageHandler};
    use crate::telemetry::{ChannelSink, NullSink};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    struct ValidatorHandler(Arc<Orchestrator>);

    impl MessageHandler for ValidatorHandler {
        async fn handle(&self, _from: SocketAddr, message: Message) -> Message {
            match message {
                Message::RequestValidateTransaction {
                    transaction,
                    sender_ledger,
                } => Message::TransactionConfirmationResult(
                    self.0
                        .handle_validation_request(transaction, sender_ledger)
                        .await,
                ),
                Message::QueryTransactionHashValid { id, hash } => {
                    Message::TransactionConfirmationResult(self.0.handle_hash_query(&id, &hash))
                }
                Message::TransactionVerdict { id, accepted } => {
                    self.0.handle_verdict(&id, accepted).await;
                    Message::Ack
                }
                other => Message::error(format!("unsupported: {}", other.kind())),
            }
        }
    }

    fn wallet(seed: u8) -> Wallet {
        Wallet::from_seed(&[seed; 32])
    }

    fn config() -> ProtocolConfig {
        ProtocolConfig::default().with_request_timeout(Duration::from_millis(500))
    }

    fn node(seed: u8, directory: Arc<PeerDirectory>) -> Orchestrator {
        Orchestrator::new(wallet(seed), directory, Arc::new(LedgerStore::new()), config())
            .with_telemetry(Arc::new(NullSink))
    }

    fn fake_set() -> ValidatorSet {
        ValidatorSet {
            witnesses: [wallet(90).public_key().clone(), wallet(91).public_key().clone()],
            partners: [wallet(92).public_key().clone(), wallet(93).public_key().clone()],
        }
    }

    fn signed(from: &Wallet, to: &Address, amount: u64, set: &ValidatorSet) -> Transaction {
        let mut tx = Transaction::new(from.public_key().clone(), to.clone(), amount, 0);
        tx.assign_validators(set).unwrap();
        tx.finalize(from);
        tx
    }

    async fn unused_location() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    /// Five served nodes: S and A regular-role, B regular, C and D partners.
    /// Every node knows every pod and has bootstrapped every pod's genesis.
    async fn network() -> Vec<Arc<Orchestrator>> {
        let roles = [
            PodRole::Regular,
            PodRole::Regular,
            PodRole::Regular,
            PodRole::Partner,
            PodRole::Partner,
        ];
        let mut listeners = Vec::new();
        let mut pods = Vec::new();
        for (i, role) in roles.iter().enumerate() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let location = listener.local_addr().unwrap();
            pods.push(Pod::new(wallet(i as u8 + 1).public_key().clone(), location, *role));
            listeners.push(listener);
        }

        let mut nodes = Vec::new();
        for (i, listener) in listeners.into_iter().enumerate() {
            let directory = Arc::new(PeerDirectory::new());
            let node = Arc::new(node(i as u8 + 1, Arc::clone(&directory)));
            for pod in &pods {
                directory.upsert(pod.clone());
                node.ledgers().bootstrap(&pod.address);
            }
            tokio::spawn(serve(listener, Arc::new(ValidatorHandler(Arc::clone(&node)))));
            nodes.push(node);
        }
        nodes
    }

    #[test]
    fn stage_names() {
        assert_eq!(ValidationStage::BuildingValidatorSet.to_string(), "BUILDING_VALIDATOR_SET");
        assert_eq!(ValidationStage::LedgerRecursionInFlight.to_string(), "LEDGER_RECURSION_IN_FLIGHT");
        assert_eq!(ValidationStage::Rejected.to_string(), "REJECTED");
    }

    #[test]
    fn validator_set_needs_enough_candidates() {
        let orch = node(1, Arc::new(PeerDirectory::new()));
        let err = orch.build_validator_set().unwrap_err();
        assert!(matches!(
            err,
            Error::Peers(podnet_peers::Error::InsufficientCandidates { role: PodRole::Regular, .. })
        ));
    }

    #[tokio::test]
    async fn validator_set_never_contains_self() {
        let directory = Arc::new(PeerDirectory::new());
        let location = unused_location().await;
        for seed in 1..=3 {
            directory.upsert(Pod::new(wallet(seed).public_key().clone(), location, PodRole::Regular));
        }
        for seed in 4..=5 {
            directory.upsert(Pod::new(wallet(seed).public_key().clone(), location, PodRole::Partner));
        }
        let orch = node(1, directory);

        for _ in 0..20 {
            let (set, pods) = orch.build_validator_set().unwrap();
            assert!(set.iter().all(|a| a != orch.address()));
            assert_ne!(set.witnesses[0], set.witnesses[1]);
            assert_eq!(pods.len(), 4);
            assert_eq!(pods[2].role, PodRole::Partner);
        }
    }

    #[tokio::test]
    async fn genesis_only_ledger_accepts_without_network() {
        let orch = node(1, Arc::new(PeerDirectory::new()));
        let sender = wallet(1);
        let ledger = Ledger::genesis(sender.public_key());
        let tx = signed(&sender, wallet(2).public_key(), 30, &fake_set());

        let result = orch.validate_transaction(&tx, &ledger).await;
        assert!(result.is_success(), "{}", result.reason);
        assert_eq!(result.id, ledger.entries[0].id);
        assert_eq!(orch.channel().connections_opened(), 0);
    }

    #[tokio::test]
    async fn genesis_only_ledger_rejects_full_amount() {
        let orch = node(1, Arc::new(PeerDirectory::new()));
        let sender = wallet(1);
        let ledger = Ledger::genesis(sender.public_key());

        for amount in [GENESIS_AMOUNT, 80] {
            let tx = signed(&sender, wallet(2).public_key(), amount, &fake_set());
            let result = orch.validate_transaction(&tx, &ledger).await;
            assert!(!result.is_success());
            assert!(result.reason.contains("insufficient genesis funds"), "{}", result.reason);
        }
    }

    #[tokio::test]
    async fn forged_genesis_is_rejected() {
        let orch = node(1, Arc::new(PeerDirectory::new()));
        let sender = wallet(1);
        let mut ledger = Ledger::genesis(sender.public_key());
        ledger.entries[0].amount = 1_000;

        let tx = signed(&sender, wallet(2).public_key(), 30, &fake_set());
        assert!(!orch.validate_transaction(&tx, &ledger).await.is_success());
    }

    #[tokio::test]
    async fn stale_id_is_rejected_before_any_connection() {
        let directory = Arc::new(PeerDirectory::new());
        let location = unused_location().await;
        let set = fake_set();
        for address in set.iter() {
            directory.upsert(Pod::new(address.clone(), location, PodRole::Regular));
        }
        let orch = node(1, directory);

        let sender = wallet(1);
        let mut ledger = Ledger::genesis(sender.public_key());
        ledger.push(signed(&sender, wallet(2).public_key(), 10, &set));

        let mut tx = Transaction::new(sender.public_key().clone(), wallet(3).public_key().clone(), 5, 0);
        tx.assign_validators(&set).unwrap();
        tx.timestamp = now_millis();
        tx.id = tx.compute_id_at(tx.timestamp - 1);
        tx.sign(&sender);
        tx.generate_hash();

        let result = orch.validate_transaction(&tx, &ledger).await;
        assert!(!result.is_success());
        assert!(result.reason.contains("invalid transaction id"), "{}", result.reason);
        assert_eq!(orch.channel().connections_opened(), 0);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_before_any_connection() {
        let orch = node(1, Arc::new(PeerDirectory::new()));
        let sender = wallet(1);
        let ledger = Ledger::genesis(sender.public_key());

        let mut tx = signed(&sender, wallet(2).public_key(), 5, &fake_set());
        tx.sign(&wallet(7));

        let result = orch.validate_transaction(&tx, &ledger).await;
        assert!(!result.is_success());
        assert!(result.reason.contains("invalid transaction signature"), "{}", result.reason);
        assert_eq!(orch.channel().connections_opened(), 0);
    }

    #[tokio::test]
    async fn unknown_historical_validators_are_skipped() {
        let orch = node(1, Arc::new(PeerDirectory::new()));
        let sender = wallet(1);
        let mut ledger = Ledger::genesis(sender.public_key());
        ledger.push(signed(&sender, wallet(2).public_key(), 10, &fake_set()));

        let tx = signed(&sender, wallet(3).public_key(), 5, &fake_set());
        let result = orch.validate_transaction(&tx, &ledger).await;
        assert!(result.is_success(), "{}", result.reason);
        assert_eq!(orch.channel().connections_opened(), 0);
    }

    #[tokio::test]
    async fn silent_validator_rejects_transaction() {
        // Accepts connections and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let location = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((stream, _)) = listener.accept().await {
                    held.push(stream);
                }
            }
        });

        let set = fake_set();
        let directory = Arc::new(PeerDirectory::new());
        directory.upsert(Pod::new(set.witnesses[0].clone(), location, PodRole::Regular));
        let orch = node(1, directory);

        let sender = wallet(1);
        let mut ledger = Ledger::genesis(sender.public_key());
        ledger.push(signed(&sender, wallet(2).public_key(), 10, &set));

        let tx = signed(&sender, wallet(3).public_key(), 5, &set);
        let result = orch.validate_transaction(&tx, &ledger).await;
        assert!(!result.is_success());
        assert!(result.reason.contains("connection timeout"), "{}", result.reason);
        assert_eq!(result.id, tx.id);
        assert_eq!(orch.channel().connections_opened(), 1);
    }

    #[tokio::test]
    async fn validator_without_record_rejects() {
        let set = fake_set();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let location = listener.local_addr().unwrap();
        let empty = Arc::new(node(90, Arc::new(PeerDirectory::new())));
        tokio::spawn(serve(listener, Arc::new(ValidatorHandler(empty))));

        let directory = Arc::new(PeerDirectory::new());
        directory.upsert(Pod::new(set.witnesses[0].clone(), location, PodRole::Regular));
        let orch = node(1, directory);

        let sender = wallet(1);
        let mut ledger = Ledger::genesis(sender.public_key());
        ledger.push(signed(&sender, wallet(2).public_key(), 10, &set));

        let tx = signed(&sender, wallet(3).public_key(), 5, &set);
        let result = orch.validate_transaction(&tx, &ledger).await;
        assert!(!result.is_success());
        assert!(result.reason.contains("ledger entry not found"), "{}", result.reason);
    }

    #[tokio::test]
    async fn foreign_sender_cannot_be_originated() {
        let orch = Arc::new(node(1, Arc::new(PeerDirectory::new())));
        let other = wallet(2);
        let tx = Transaction::new(other.public_key().clone(), wallet(3).public_key().clone(), 1, 0);
        let outcome = orch
            .request_validate_transaction(tx, Ledger::genesis(other.public_key()))
            .await
            .unwrap();
        assert!(matches!(outcome, Err(Error::ForeignSender(_))));
    }

    #[tokio::test]
    async fn transfers_across_a_live_network() {
        let nodes = network().await;
        let sender = &nodes[0];
        let me = sender.address().clone();
        let receiver = wallet(50).public_key().clone();

        let first = sender.submit(receiver.clone(), 30).await.unwrap();
        assert!(first.is_accepted(), "{}", first.result.reason);
        assert!(first.applied);
        assert_eq!(first.confirmations.len(), 4);
        assert!(first.confirmations.iter().all(|c| c.is_success()));
        assert_eq!(sender.ledgers().balance(&me), 20);
        assert_eq!(sender.ledgers().balance(&receiver), 30);
        assert_eq!(sender.ledgers().ledger(&me).unwrap().len(), 2);

        // Every validator recorded the transaction and updated its copy.
        for validator in first.transaction.validators() {
            let node = nodes.iter().find(|n| n.address() == validator).unwrap();
            assert!(node.ledgers().find_witness(&first.transaction.id).is_some());
            assert_eq!(node.ledgers().balance(&me), 20);
        }

        // Second transfer walks the first entry through its validators.
        let second_receiver = wallet(51).public_key().clone();
        let before = sender.channel().connections_opened();
        let second = sender.submit(second_receiver.clone(), 15).await.unwrap();
        assert!(second.is_accepted(), "{}", second.result.reason);
        assert_eq!(sender.ledgers().balance(&me), 5);
        assert_eq!(sender.ledgers().balance(&second_receiver), 15);
        // Four confirmation requests, four hash queries, four verdicts.
        assert_eq!(sender.channel().connections_opened() - before, 12);
    }

    #[tokio::test]
    async fn overdraft_is_rejected_without_mutation() {
        let nodes = network().await;
        let sender = &nodes[0];
        let me = sender.address().clone();
        let receiver = wallet(50).public_key().clone();

        let verdict = sender.submit(receiver.clone(), 80).await.unwrap();
        assert!(!verdict.is_accepted());
        assert!(!verdict.applied);
        assert!(verdict.result.reason.contains("insufficient"), "{}", verdict.result.reason);
        assert_eq!(sender.ledgers().ledger(&me).unwrap().len(), 1);
        assert!(sender.ledgers().ledger(&receiver).is_none());
        for node in &nodes[1..] {
            assert_eq!(node.ledgers().balance(&me), 50);
        }
    }

    #[tokio::test]
    async fn originator_rejection_is_not_written_by_validators() {
        let nodes = network().await;
        let sender = &nodes[0];
        let me = sender.address().clone();
        let owner = wallet(1);

        // Only the originator knows a validator of the prior entry, and it
        // never answers. Validators skip that entry and accept.
        let set = fake_set();
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let location = silent.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((stream, _)) = silent.accept().await {
                    held.push(stream);
                }
            }
        });
        sender
            .directory()
            .upsert(Pod::new(set.witnesses[0].clone(), location, PodRole::Dummy));
        let mut history = Ledger::genesis(&me);
        history.push(signed(&owner, wallet(2).public_key(), 10, &set));
        sender.ledgers().sync(&me, &history);

        let verdict = sender.submit(wallet(50).public_key().clone(), 5).await.unwrap();
        assert!(verdict.confirmations.iter().all(|c| c.is_success()));
        assert!(!verdict.is_accepted());
        assert!(verdict.result.reason.contains("connection timeout"), "{}", verdict.result.reason);
        assert_eq!(sender.ledgers().ledger(&me).unwrap(), history);

        for node in &nodes[1..] {
            assert_eq!(node.ledgers().ledger(&me).unwrap().len(), 1);
            assert_eq!(node.ledgers().balance(&me), 50);
            assert!(node.ledgers().find_witness(&verdict.transaction.id).is_none());
            assert!(node.ledgers().take_pending(&verdict.transaction.id).is_none());
        }
    }

    #[tokio::test]
    async fn accepted_verdict_replaces_stale_sender_copy() {
        let validator = node(9, Arc::new(PeerDirectory::new()));
        let owner = wallet(1);
        let sender = owner.public_key().clone();
        validator.ledgers().bootstrap(&sender);

        let set = fake_set();
        let prior = signed(&owner, wallet(2).public_key(), 10, &set);
        let mut history = Ledger::genesis(&sender);
        history.push(prior.clone());
        let tx = signed(&owner, wallet(3).public_key(), 15, &set);

        let result = validator.handle_validation_request(tx.clone(), history).await;
        assert!(result.is_success(), "{}", result.reason);
        assert_eq!(validator.ledgers().balance(&sender), 50);
        assert!(validator.ledgers().find_witness(&tx.id).is_none());

        assert!(validator.handle_verdict(&tx.id, true).await);
        assert_eq!(validator.ledgers().balance(&sender), 25);
        assert_eq!(validator.ledgers().ledger(&sender).unwrap().len(), 3);

        // Only what this node witnessed answers hash queries.
        assert!(validator.handle_hash_query(&tx.id, &tx.hash).is_success());
        let unseen = validator.handle_hash_query(&prior.id, &prior.hash);
        assert!(!unseen.is_success());
        assert!(unseen.reason.contains("ledger entry not found"), "{}", unseen.reason);
    }

    #[tokio::test]
    async fn rejected_verdict_discards_pending_transaction() {
        let validator = node(9, Arc::new(PeerDirectory::new()));
        let owner = wallet(1);
        let sender = owner.public_key().clone();
        validator.ledgers().bootstrap(&sender);

        let history = Ledger::genesis(&sender);
        let tx = signed(&owner, wallet(3).public_key(), 15, &fake_set());
        assert!(validator.handle_validation_request(tx.clone(), history).await.is_success());

        assert!(!validator.handle_verdict(&tx.id, false).await);
        assert!(!validator.handle_verdict(&tx.id, true).await);
        assert_eq!(validator.ledgers().ledger(&sender).unwrap().len(), 1);
        assert!(validator.ledgers().find_witness(&tx.id).is_none());
    }

    #[tokio::test]
    async fn background_attempt_reports_through_handle() {
        let nodes = network().await;
        let sender = Arc::clone(&nodes[0]);
        let me = sender.address().clone();
        let tx = Transaction::new(me.clone(), wallet(50).public_key().clone(), 10, 0);
        let ledger = sender.ledgers().ledger(&me).unwrap();

        let verdict = sender
            .request_validate_transaction(tx, ledger)
            .await
            .unwrap()
            .unwrap();
        assert!(verdict.is_accepted(), "{}", verdict.result.reason);
        assert_eq!(sender.ledgers().balance(&me), 40);
    }

    #[tokio::test]
    async fn telemetry_brackets_the_attempt() {
        let (sink, mut rx) = ChannelSink::new();
        let orch = Orchestrator::new(
            wallet(1),
            Arc::new(PeerDirectory::new()),
            Arc::new(LedgerStore::new()),
            config(),
        )
        .with_telemetry(Arc::new(sink));

        let sender = wallet(1);
        let ledger = Ledger::genesis(sender.public_key());
        let tx = signed(&sender, wallet(2).public_key(), 5, &fake_set());
        orch.validate_transaction(&tx, &ledger).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event.event);
        }
        assert_eq!(events.first(), Some(&EventType::RequestValidationStart));
        assert_eq!(events.last(), Some(&EventType::RequestValidationEnd));
        assert!(events.contains(&EventType::ValidateLedgerStart));
        assert!(events.contains(&EventType::ValidateSignatureEnd));
    }
}
