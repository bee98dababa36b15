//! Timing events for the validation pipeline.
//!
//! The orchestrator brackets each step with a `*Start` / `*End` pair so a
//! collector can measure where time goes. Events are handed to a
//! [`TelemetrySink`]; the default sink writes them through `tracing`.

use std::fmt;
use std::net::SocketAddr;

use podnet_ledger::{now_millis, Address};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

/// Event catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    PodJoined,
    PodLeft,
    TransactionStart,
    TransactionEnd,
    RequestValidationStart,
    RequestValidationEnd,
    ConnectToValidatorStart,
    ConnectToValidatorEnd,
    ConnectToPreviousValidatorStart,
    ConnectToPreviousValidatorEnd,
    GenerateSignatureStart,
    GenerateSignatureEnd,
    GenerateTransactionIdStart,
    GenerateTransactionIdEnd,
    GenerateTransactionHashStart,
    GenerateTransactionHashEnd,
    SelectRandomPodsStart,
    SelectRandomPodsEnd,
    ValidateSignatureStart,
    ValidateSignatureEnd,
    GetEntryFromLedgerStart,
    GetEntryFromLedgerEnd,
    ValidateLedgerStart,
    ValidateLedgerEnd,
    WriteToMyLedgerStart,
    WriteToMyLedgerEnd,
    WriteToWitnessLedgerStart,
    WriteToWitnessLedgerEnd,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Serialized form is the canonical name.
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(name)) => f.write_str(&name),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// One telemetry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub event: EventType,
    pub owner: Address,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_to: Option<SocketAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_length: Option<usize>,
}

impl LogEvent {
    /// Create an event stamped with the current time.
    pub fn new(event: EventType, owner: &Address) -> Self {
        Self {
            event,
            owner: owner.clone(),
            timestamp: now_millis(),
            transaction_id: None,
            sender: None,
            receiver: None,
            validator: None,
            connection_to: None,
            ledger_length: None,
        }
    }

    #[must_use]
    pub fn transaction(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn parties(mut self, sender: &Address, receiver: &Address) -> Self {
        self.sender = Some(sender.clone());
        self.receiver = Some(receiver.clone());
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: &Address) -> Self {
        self.validator = Some(validator.clone());
        self
    }

    #[must_use]
    pub fn connection_to(mut self, location: SocketAddr) -> Self {
        self.connection_to = Some(location);
        self
    }

    #[must_use]
    pub fn ledger_length(mut self, len: usize) -> Self {
        self.ledger_length = Some(len);
        self
    }
}

/// Destination for telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: LogEvent);
}

/// Writes events as structured `tracing` records on the `podnet::telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: LogEvent) {
        info!(
            target: "podnet::telemetry",
            event = %event.event,
            owner = %event.owner.short(),
            transaction_id = event.transaction_id.as_deref().unwrap_or(""),
            validator = event.validator.as_ref().map(|a| a.short()).unwrap_or(""),
            connection_to = ?event.connection_to,
            ledger_length = ?event.ledger_length,
            timestamp = event.timestamp,
            "telemetry"
        );
    }
}

/// Forwards events to an unbounded channel, e.g. for a collector task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LogEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelSink {
    fn emit(&self, event: LogEvent) {
        // Receiver gone means nobody is collecting.
        let _ = self.tx.send(event);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&self, _event: LogEvent) {}
}
