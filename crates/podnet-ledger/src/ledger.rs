//! Per-account ledgers and the node-local ledger store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::transaction::{genesis_transaction, Transaction, ValidationResult};

/// An account's ordered history of confirmed transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub entries: Vec<Transaction>,
}

impl Ledger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger seeded with the genesis credit for `address`.
    pub fn genesis(address: &Address) -> Self {
        Self {
            entries: vec![genesis_transaction(address)],
        }
    }

    /// Append an entry.
    pub fn push(&mut self, tx: Transaction) {
        self.entries.push(tx);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Credits minus debits for `account`.
    pub fn balance(&self, account: &Address) -> i128 {
        self.entries.iter().fold(0i128, |acc, entry| {
            let mut acc = acc;
            if &entry.address == account {
                acc += i128::from(entry.amount);
            }
            if &entry.from == account {
                acc -= i128::from(entry.amount);
            }
            acc
        })
    }

    /// Look up an entry by transaction id.
    pub fn find(&self, id: &str) -> Option<&Transaction> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// A freshly bootstrapped ledger: exactly one entry, a genesis credit.
    pub fn is_genesis_only(&self) -> bool {
        matches!(self.entries.as_slice(), [only] if only.is_genesis())
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    ledgers: HashMap<Address, Ledger>,
    /// Transactions this node confirmed as a witness or partner. Hash
    /// queries are answered from here only.
    witnesses: HashMap<String, Transaction>,
    /// Transactions this node accepted as a validator, waiting for the
    /// originator's verdict, with the sender ledger they were checked against.
    pending: HashMap<String, (Transaction, Ledger)>,
}

type AccountLocks = HashMap<Address, Arc<tokio::sync::Mutex<()>>>;

/// Node-local ledger state.
///
/// Holds this node's copy of every account ledger it knows about and the
/// index of transactions it has witnessed. Appends are atomic across the
/// sender and receiver ledgers; [`lock_account`](Self::lock_account) lets
/// callers serialize whole validation attempts per account.
#[derive(Debug, Default)]
pub struct LedgerStore {
    inner: RwLock<StoreInner>,
    account_locks: Mutex<AccountLocks>,
}

impl LedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `address` with its genesis ledger if the account is unknown.
    /// Returns true if the account was created.
    pub fn bootstrap(&self, address: &Address) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.ledgers.contains_key(address) {
            return false;
        }
        inner.ledgers.insert(address.clone(), Ledger::genesis(address));
        debug!(account = %address.short(), "Bootstrapped genesis ledger");
        true
    }

    /// Snapshot of an account's ledger.
    pub fn ledger(&self, address: &Address) -> Option<Ledger> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ledgers
            .get(address)
            .cloned()
    }

    /// Balance of an account according to its own ledger (0 if unknown).
    pub fn balance(&self, address: &Address) -> i128 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ledgers
            .get(address)
            .map(|l| l.balance(address))
            .unwrap_or(0)
    }

    /// All accounts with a ledger on this node.
    pub fn accounts(&self) -> Vec<Address> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut accounts: Vec<_> = inner.ledgers.keys().cloned().collect();
        accounts.sort();
        accounts
    }

    /// Make a validated `ledger` the local copy of `address` when the local
    /// copy is missing or shorter. Returns true if the copy was replaced.
    pub fn sync(&self, address: &Address, ledger: &Ledger) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(local) = inner.ledgers.get(address) {
            if local.len() >= ledger.len() {
                return false;
            }
            if !ledger.entries.starts_with(&local.entries) {
                debug!(account = %address.short(), "Replacing diverged ledger copy");
            }
        }
        inner.ledgers.insert(address.clone(), ledger.clone());
        trace!(account = %address.short(), entries = ledger.len(), "Synced ledger copy");
        true
    }

    /// Recompute the sender's balance and, if it covers the amount, append
    /// the transaction to the sender's and receiver's ledgers in one step.
    /// A receiver without a local ledger gets an empty one; genesis credit
    /// only comes from [`bootstrap`](Self::bootstrap).
    ///
    /// Returns `Ok(false)` if the transaction was already applied.
    pub fn commit(&self, tx: &Transaction) -> Result<bool> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let Some(sender) = inner.ledgers.get_mut(&tx.from) else {
            return Err(Error::InsufficientFunds {
                holdings: 0,
                amount: tx.amount,
            });
        };
        if sender.find(&tx.id).is_some() {
            trace!(id = %tx.id, "Transaction already in sender ledger");
            return Ok(false);
        }
        let holdings = sender.balance(&tx.from);
        if holdings < i128::from(tx.amount) {
            return Err(Error::InsufficientFunds {
                holdings,
                amount: tx.amount,
            });
        }
        sender.push(tx.clone());

        if tx.address != tx.from {
            inner
                .ledgers
                .entry(tx.address.clone())
                .or_default()
                .push(tx.clone());
        }

        debug!(
            id = %tx.id,
            from = %tx.from.short(),
            to = %tx.address.short(),
            amount = tx.amount,
            "Committed transaction"
        );
        Ok(true)
    }

    /// Remember a transaction this node confirmed as a validator.
    pub fn record_witness(&self, tx: &Transaction) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.witnesses.insert(tx.id.clone(), tx.clone());
    }

    /// Look up a witnessed transaction by id.
    pub fn find_witness(&self, id: &str) -> Option<Transaction> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .witnesses
            .get(id)
            .cloned()
    }

    /// Park a transaction accepted as a validator until the originator's
    /// verdict arrives.
    pub fn hold_pending(&self, tx: &Transaction, sender_ledger: &Ledger) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .pending
            .insert(tx.id.clone(), (tx.clone(), sender_ledger.clone()));
    }

    /// Remove and return a parked transaction and its sender ledger.
    pub fn take_pending(&self, id: &str) -> Option<(Transaction, Ledger)> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .remove(id)
    }

    /// Answer a hash query: does the hash a peer holds for `id` match the
    /// hash recomputed from this node's witness record of that transaction?
    pub fn validate_transaction_hash(&self, id: &str, hash: &str) -> ValidationResult {
        let Some(record) = self.find_witness(id) else {
            return ValidationResult::failure(id, Error::LedgerEntryNotFound(id.to_string()));
        };
        if record.compute_hash() == hash {
            ValidationResult::success(id, "transaction hash is valid")
        } else {
            ValidationResult::failure(id, "transaction hash is invalid")
        }
    }

    fn account_lock(&self, address: &Address) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .account_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(address.clone()).or_default())
    }

    /// Serialize validation attempts for `address`. The lock is released
    /// and forgotten when the guard drops and nobody else waits on it.
    pub async fn lock_account(&self, address: &Address) -> AccountGuard<'_> {
        let guard = self.account_lock(address).lock_owned().await;
        AccountGuard {
            store: self,
            address: address.clone(),
            guard: Some(guard),
        }
    }

    /// Drop all ledgers, witness records and pending confirmations.
    pub fn wipe(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.ledgers.clear();
        inner.witnesses.clear();
        inner.pending.clear();
        debug!("Ledger store wiped");
    }
}

/// Held while a validation attempt for one account is in flight.
#[derive(Debug)]
pub struct AccountGuard<'a> {
    store: &'a LedgerStore,
    address: Address,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for AccountGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self
            .store
            .account_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.address)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.address);
        }
    }
}
