//! Transaction model.
//!
//! A transaction moves `amount` from `from` to `address` and names the four
//! pods that validated it: two witnesses (regular pods) and two partners
//! (partner pods). Three derived values are carried alongside the fields:
//!
//! - `id`: Blake3 over `(witnessOne, witnessTwo, partnerOne, partnerTwo,
//!   address, from, timestamp)`. Any party holding the fields can recompute
//!   it, so it doubles as an integrity check.
//! - `signature`: ed25519 signature over `id` by the key behind `from`.
//! - `hash`: Blake3 over the validators, `address`, `amount`, `from` and
//!   `timestamp`. Validators attest to a transaction by this value.
//!
//! Validator fields are write-once and must be assigned before the id is
//! derived. [`Transaction::finalize`] stamps the timestamp and derives id,
//! signature and hash in one step so that the stored id always matches the
//! id recomputed from the stored timestamp.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::wallet::{self, Wallet};

/// Timestamp of every genesis transaction (unix millis).
pub const GENESIS_TIMESTAMP: u64 = 1_525_278_308_842;

/// Initial holdings credited to a new account.
pub const GENESIS_AMOUNT: u64 = 50;

/// Well-known seed of the genesis wallet.
const GENESIS_SEED: [u8; 32] = *b"podnet-test-network-genesis-seed";

fn genesis_wallet() -> &'static Wallet {
    static WALLET: OnceLock<Wallet> = OnceLock::new();
    WALLET.get_or_init(|| Wallet::from_seed(&GENESIS_SEED))
}

/// The fixed address genesis credits are issued from.
pub fn genesis_address() -> &'static Address {
    genesis_wallet().public_key()
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The four pods selected to validate a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    pub witnesses: [Address; 2],
    pub partners: [Address; 2],
}

impl ValidatorSet {
    /// Validators in field order: witnessOne, witnessTwo, partnerOne, partnerTwo.
    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.witnesses.iter().chain(self.partners.iter())
    }
}

/// A ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub id: String,
    pub from: Address,
    pub address: Address,
    pub amount: u64,
    pub timestamp: u64,
    #[serde(default)]
    pub witness_one: Option<Address>,
    #[serde(default)]
    pub witness_two: Option<Address>,
    #[serde(default)]
    pub partner_one: Option<Address>,
    #[serde(default)]
    pub partner_two: Option<Address>,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub hash: String,
}

impl Transaction {
    /// Create an unsigned transaction with no validators assigned.
    pub fn new(from: Address, address: Address, amount: u64, timestamp: u64) -> Self {
        Self {
            id: String::new(),
            from,
            address,
            amount,
            timestamp,
            witness_one: None,
            witness_two: None,
            partner_one: None,
            partner_two: None,
            signature: String::new(),
            hash: String::new(),
        }
    }

    /// Assign the validator set. Fails if any validator field is already set.
    pub fn assign_validators(&mut self, set: &ValidatorSet) -> Result<()> {
        if self.has_validators() {
            return Err(Error::ValidatorsAlreadyAssigned(self.id.clone()));
        }
        let [w1, w2] = set.witnesses.clone();
        let [p1, p2] = set.partners.clone();
        self.witness_one = Some(w1);
        self.witness_two = Some(w2);
        self.partner_one = Some(p1);
        self.partner_two = Some(p2);
        Ok(())
    }

    /// Whether any validator field is set.
    pub fn has_validators(&self) -> bool {
        self.witness_one.is_some()
            || self.witness_two.is_some()
            || self.partner_one.is_some()
            || self.partner_two.is_some()
    }

    /// Assigned validators in field order, skipping unset fields.
    pub fn validators(&self) -> Vec<&Address> {
        [
            &self.witness_one,
            &self.witness_two,
            &self.partner_one,
            &self.partner_two,
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Whether this is a genesis credit.
    pub fn is_genesis(&self) -> bool {
        &self.from == genesis_address()
    }

    /// Derive the id over the current field set using `timestamp` in place
    /// of the stored one.
    pub fn compute_id_at(&self, timestamp: u64) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"podnet:tx-id");
        for field in [
            opt_str(&self.witness_one),
            opt_str(&self.witness_two),
            opt_str(&self.partner_one),
            opt_str(&self.partner_two),
            self.address.as_str(),
            self.from.as_str(),
        ] {
            hasher.update(b"\n");
            hasher.update(field.as_bytes());
        }
        hasher.update(b"\n");
        hasher.update(timestamp.to_string().as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Derive the id with the wall-clock time at the moment of the call.
    ///
    /// Only equal to [`compute_expected_id`](Self::compute_expected_id) when
    /// the stored timestamp is that same instant; use
    /// [`assign_id`](Self::assign_id) to stamp both together.
    pub fn compute_id(&self) -> String {
        self.compute_id_at(now_millis())
    }

    /// Derive the id from the stored timestamp. Verifiers compare this
    /// against `id`.
    pub fn compute_expected_id(&self) -> String {
        self.compute_id_at(self.timestamp)
    }

    /// Stamp the current time and derive the id from it in one step.
    pub fn assign_id(&mut self) {
        self.timestamp = now_millis();
        self.id = self.compute_expected_id();
    }

    /// Content hash over validators, address, amount, from and timestamp.
    pub fn compute_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"podnet:tx-hash");
        let amount = self.amount.to_string();
        let timestamp = self.timestamp.to_string();
        for field in [
            opt_str(&self.witness_one),
            opt_str(&self.witness_two),
            opt_str(&self.partner_one),
            opt_str(&self.partner_two),
            self.address.as_str(),
            amount.as_str(),
            self.from.as_str(),
            timestamp.as_str(),
        ] {
            hasher.update(b"\n");
            hasher.update(field.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Store the content hash.
    pub fn generate_hash(&mut self) {
        self.hash = self.compute_hash();
    }

    /// Sign the id with `wallet`.
    pub fn sign(&mut self, wallet: &Wallet) {
        self.signature = wallet.sign(self.id.as_bytes());
    }

    /// Stamp the timestamp, derive the id, sign it and store the hash.
    pub fn finalize(&mut self, wallet: &Wallet) {
        self.assign_id();
        self.sign(wallet);
        self.generate_hash();
    }

    /// Verify the signature over `id` with the key behind `from`.
    pub fn verify_signature(&self) -> Result<bool> {
        wallet::verify(&self.from, self.id.as_bytes(), &self.signature)
    }

    /// Reject if `id` differs from the id recomputed from the stored fields.
    pub fn check_id(&self) -> Result<()> {
        let expected = self.compute_expected_id();
        if expected != self.id {
            return Err(Error::InvalidTransactionId {
                expected,
                got: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Reject if the signature does not verify.
    pub fn check_signature(&self) -> Result<()> {
        if self.verify_signature()? {
            Ok(())
        } else {
            Err(Error::InvalidSignature {
                id: self.id.clone(),
            })
        }
    }
}

fn opt_str(addr: &Option<Address>) -> &str {
    addr.as_ref().map(Address::as_str).unwrap_or("")
}

/// Build the genesis credit for a new account.
///
/// Deterministic: every node derives the same entry for the same address.
pub fn genesis_transaction(address: &Address) -> Transaction {
    let mut tx = Transaction::new(
        genesis_address().clone(),
        address.clone(),
        GENESIS_AMOUNT,
        GENESIS_TIMESTAMP,
    );
    tx.id = tx.compute_expected_id();
    tx.sign(genesis_wallet());
    tx.generate_hash();
    tx
}

/// Outcome of a single validation step or of a whole validation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub result: bool,
    pub reason: String,
    pub id: String,
}

impl ValidationResult {
    /// A passing result.
    pub fn success(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            result: true,
            reason: reason.into(),
            id: id.into(),
        }
    }

    /// A failing result whose reason is the display form of `reason`.
    pub fn failure(id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            result: false,
            reason: reason.to_string(),
            id: id.into(),
        }
    }

    /// Whether the step passed.
    pub fn is_success(&self) -> bool {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn wallet(seed: u8) -> Wallet {
        Wallet::from_seed(&[seed; 32])
    }

    fn validators() -> ValidatorSet {
        ValidatorSet {
            witnesses: [wallet(10).public_key().clone(), wallet(11).public_key().clone()],
            partners: [wallet(20).public_key().clone(), wallet(21).public_key().clone()],
        }
    }

    fn signed_tx(amount: u64) -> (Wallet, Transaction) {
        let sender = wallet(1);
        let receiver = wallet(2);
        let mut tx = Transaction::new(
            sender.public_key().clone(),
            receiver.public_key().clone(),
            amount,
            0,
        );
        tx.assign_validators(&validators()).unwrap();
        tx.finalize(&sender);
        (sender, tx)
    }

    #[test]
    fn live_id_matches_stored_timestamp_only_at_that_instant() {
        let (_, mut tx) = signed_tx(5);

        loop {
            tx.timestamp = now_millis();
            let live = tx.compute_id();
            if now_millis() == tx.timestamp {
                assert_eq!(live, tx.compute_expected_id());
                break;
            }
        }

        tx.timestamp -= 1_000;
        assert_ne!(tx.compute_id(), tx.compute_expected_id());
    }

    #[test]
    fn finalized_id_matches_expected() {
        let (_, tx) = signed_tx(10);
        assert_eq!(tx.id, tx.compute_expected_id());
        assert!(tx.check_id().is_ok());
        assert!(tx.check_signature().is_ok());
        assert_eq!(tx.hash, tx.compute_hash());
    }

    #[test]
    fn stale_timestamp_id_is_rejected() {
        let (sender, mut tx) = signed_tx(10);
        tx.id = tx.compute_id_at(tx.timestamp - 1_000);
        tx.sign(&sender);
        assert!(matches!(
            tx.check_id(),
            Err(Error::InvalidTransactionId { .. })
        ));
        // The signature itself is fine; only the id is stale.
        assert!(tx.check_signature().is_ok());
    }

    #[test]
    fn validators_are_write_once() {
        let (_, mut tx) = signed_tx(10);
        assert!(matches!(
            tx.assign_validators(&validators()),
            Err(Error::ValidatorsAlreadyAssigned(_))
        ));
        assert_eq!(tx.validators().len(), 4);
    }

    #[test]
    fn signature_from_other_key_fails() {
        let (_, mut tx) = signed_tx(10);
        tx.sign(&wallet(9));
        assert!(matches!(
            tx.check_signature(),
            Err(Error::InvalidSignature { .. })
        ));
    }

    #[test]
    fn hash_covers_amount_but_id_does_not() {
        let (_, tx) = signed_tx(10);
        let mut changed = tx.clone();
        changed.amount = 11;
        assert_eq!(changed.compute_expected_id(), tx.id);
        assert_ne!(changed.compute_hash(), tx.hash);
    }

    #[test]
    fn genesis_is_deterministic_and_authentic() {
        let owner = wallet(4);
        let a = genesis_transaction(owner.public_key());
        let b = genesis_transaction(owner.public_key());
        assert_eq!(a, b);
        assert!(a.is_genesis());
        assert!(!a.has_validators());
        assert_eq!(a.amount, GENESIS_AMOUNT);
        assert_eq!(a.timestamp, GENESIS_TIMESTAMP);
        assert!(a.check_id().is_ok());
        assert!(a.check_signature().is_ok());
    }

    #[test]
    fn wire_format_uses_camel_case() {
        let (_, tx) = signed_tx(10);
        let json = serde_json::to_value(&tx).unwrap();
        assert!(json.get("witnessOne").is_some());
        assert!(json.get("partnerTwo").is_some());
        let back: Transaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn failure_result_carries_error_text() {
        let err = Error::InsufficientFunds {
            holdings: 5,
            amount: 10,
        };
        let res = ValidationResult::failure("abc", &err);
        assert!(!res.is_success());
        assert!(res.reason.contains("insufficient funds"));
        assert_eq!(res.id, "abc");
    }

    proptest! {
        #[test]
        fn id_roundtrips_for_any_timestamp(ts in any::<u64>(), amount in any::<u64>()) {
            let sender = wallet(1);
            let mut tx = Transaction::new(
                sender.public_key().clone(),
                wallet(2).public_key().clone(),
                amount,
                ts,
            );
            tx.assign_validators(&validators()).unwrap();
            tx.id = tx.compute_id_at(ts);
            prop_assert_eq!(tx.compute_expected_id(), tx.id.clone());
        }

        #[test]
        fn any_single_bit_flip_in_id_breaks_signature(byte in 0usize..64, bit in 0u8..8) {
            let (_, mut tx) = signed_tx(7);
            let mut raw = tx.id.clone().into_bytes();
            raw[byte] ^= 1 << bit;
            tx.id = String::from_utf8_lossy(&raw).into_owned();
            prop_assert!(!tx.verify_signature().unwrap());
        }
    }
}
