//! SMSC side of SMPP v3.4.
//!
//! ESMEs bind to a [`Gateway`](server::Gateway), submit messages and get
//! back a message id at once. Each accepted submission is handed to the
//! bounded [`Pipeline`](pipeline::Pipeline), which relays it downstream, and
//! when a receipt was requested the [`Scheduler`](scheduler::Scheduler)
//! returns a deliver_sm receipt to a session of the same client after a
//! randomized delay.
//!
//! The wire layer ([`codec`], [`connection`], [`datatypes`]) and the
//! outbound PDU builders in [`pdu`] can be used on their own, for example to
//! drive the gateway as an ESME in tests.

pub mod codec;
pub mod config;
pub mod connection;
pub mod datatypes;
mod macros;
pub mod message_id;
pub mod pdu;
pub mod pipeline;
pub mod scheduler;
pub mod segmented;
pub mod server;


pub use codec::{CodecError, Decodable, Encodable, Frame, PduHeader, PduRegistry};
pub use config::GatewayConfig;
pub use connection::{Connection, ConnectionError};
pub use message_id::MessageIdGenerator;
pub use pipeline::{Pipeline, Relay, RelayOutcome, SubmittedMessageEvent};
pub use scheduler::{ScheduledRecord, Scheduler};
pub use server::{Gateway, GatewayContext, SessionRegistry};

/// Error returned by the binary and other top-level glue.
///
/// Library modules return their own `thiserror` enums; this boxed form is
/// what they collapse into at the edge.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;
