//! Pod Network Protocols
//!
//! How pods talk and how they agree a transaction is valid.
//!
//! - [`channel`]: newline-delimited JSON over TCP, one connection per
//!   request, every exchange bounded by a timeout.
//! - [`message`]: the typed `{type, data}` envelopes.
//! - [`orchestrator`]: the validation protocol. Two witnesses and two
//!   partners confirm each transaction; before a sender's claimed balance is
//!   trusted, every historical entry is re-confirmed with the validators that
//!   originally confirmed it.
//! - [`telemetry`]: start/end timing events for each protocol step.

pub mod channel;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod telemetry;

pub use channel::{serve, MessageHandler, PeerChannel, DEFAULT_REQUEST_TIMEOUT, MAX_FRAME_BYTES};
pub use error::{Error, Result};
pub use message::{Message, MessageCategory};
pub use orchestrator::{
    Orchestrator, ProtocolConfig, ValidationStage, Verdict, PARTNER_COUNT, WITNESS_COUNT,
};
pub use telemetry::{ChannelSink, EventType, LogEvent, NullSink, TelemetrySink, TracingSink};
