//! Core tailrpc primitives shared across crates.
//!
//! Includes the message envelope, reserved control names, node address
//! matching, clocks, and base errors.

pub mod address;
pub mod clock;
pub mod envelope;
pub mod error;
pub mod types;

pub use address::AddressPattern;
pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::{
    is_reserved, join_recipients, ControlFn, Envelope, InboundKind, LogRecord, BROADCAST,
    CONTROL_PREFIX,
};
pub use error::CoreError;
pub use serde_json::Value;
pub use types::{CorrelationId, RecordId, Timestamp};
