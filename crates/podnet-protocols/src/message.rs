//! Wire messages.
//!
//! Every frame is one JSON object `{ "type": ..., "data": ... }` terminated
//! by a newline. Almost everything is request/response; `GOODBYE` is
//! broadcast without waiting for replies.

use podnet_ledger::{Address, Ledger, Transaction, ValidationResult};
use podnet_peers::Pod;
use serde::{Deserialize, Serialize};

/// How a message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    /// Sent to one peer; exactly one correlated response is awaited.
    Request,
    /// Sent to many peers; responses are not awaited.
    Broadcast,
    /// Sent back on the connection a request arrived on.
    Response,
}

/// A typed envelope carried by the peer channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Ask a selected validator to confirm a new transaction.
    RequestValidateTransaction {
        transaction: Transaction,
        #[serde(rename = "senderLedger")]
        sender_ledger: Ledger,
    },
    /// Ask an original validator whether it holds `hash` for transaction `id`.
    QueryTransactionHashValid { id: String, hash: String },
    /// Answer to either validation request.
    TransactionConfirmationResult(ValidationResult),
    /// The originator's final verdict, sent to the selected validators once
    /// aggregation is done. Validators only write on `accepted`.
    TransactionVerdict { id: String, accepted: bool },

    /// Introduce a pod; answered with [`Message::Peers`].
    Hello { pod: Pod },
    /// A pod is leaving the network.
    Goodbye { address: Address },
    /// Known pods.
    Peers { pods: Vec<Pod> },
    /// Ask for the responder's peer list.
    QueryPeers,

    /// Have the receiving node send `amount` to `address` from its own wallet.
    SubmitTransaction { address: Address, amount: u64 },
    /// Ask for an account balance.
    QueryBalance { address: Address },
    /// Balance answer.
    Balance {
        address: Address,
        balance: i64,
        entries: usize,
    },
    /// Clear ledgers and peers on the receiving node.
    Wipe,

    Ping,
    Pong,
    Ack,
    Error { message: String },
}

impl Message {
    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestValidateTransaction { .. } => "REQUEST_VALIDATE_TRANSACTION",
            Self::QueryTransactionHashValid { .. } => "QUERY_TRANSACTION_HASH_VALID",
            Self::TransactionConfirmationResult(_) => "TRANSACTION_CONFIRMATION_RESULT",
            Self::TransactionVerdict { .. } => "TRANSACTION_VERDICT",
            Self::Hello { .. } => "HELLO",
            Self::Goodbye { .. } => "GOODBYE",
            Self::Peers { .. } => "PEERS",
            Self::QueryPeers => "QUERY_PEERS",
            Self::SubmitTransaction { .. } => "SUBMIT_TRANSACTION",
            Self::QueryBalance { .. } => "QUERY_BALANCE",
            Self::Balance { .. } => "BALANCE",
            Self::Wipe => "WIPE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Ack => "ACK",
            Self::Error { .. } => "ERROR",
        }
    }

    /// Delivery category of this message.
    pub fn category(&self) -> MessageCategory {
        match self {
            Self::Goodbye { .. } => MessageCategory::Broadcast,
            Self::TransactionConfirmationResult(_)
            | Self::Peers { .. }
            | Self::Balance { .. }
            | Self::Pong
            | Self::Ack
            | Self::Error { .. } => MessageCategory::Response,
            _ => MessageCategory::Request,
        }
    }

    /// Shorthand for an error reply.
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}
