//! Pod Network Ledger
//!
//! The data side of the pod test network: account addresses, the node
//! wallet, the transaction model and the per-account ledgers each node keeps.
//!
//! # Transactions
//!
//! A [`Transaction`] names two witnesses and two partners that validated it.
//! Its `id` is derived from those validators plus sender, receiver and
//! timestamp; its `signature` signs the id; its `hash` covers the same fields
//! plus the amount and is what validators later attest to.
//!
//! # Ledgers
//!
//! A [`Ledger`] is an account's ordered history. Balance is credits minus
//! debits. A ledger holding only the genesis credit is "freshly
//! bootstrapped" and skips recursive validation.
//!
//! The [`LedgerStore`] is a node's copy of all ledgers it knows about plus
//! the index of transactions it confirmed as a validator.

pub mod address;
pub mod error;
pub mod ledger;
pub mod transaction;
pub mod wallet;

pub use address::{Address, ADDRESS_LEN, ADDRESS_PREFIX};
pub use error::{Error, Result};
pub use ledger::{AccountGuard, Ledger, LedgerStore};
pub use transaction::{
    genesis_address, genesis_transaction, now_millis, Transaction, ValidationResult,
    ValidatorSet, GENESIS_AMOUNT, GENESIS_TIMESTAMP,
};
pub use wallet::Wallet;
