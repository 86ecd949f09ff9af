//! Shared append-only log abstractions for tailrpc.
//!
//! The engine only depends on the record-oriented log and tail-cursor traits
//! defined here. `CappedMemoryLog` is the in-process reference log.

pub mod log;
pub mod memory;

pub use log::{CursorPoll, LogError, LogHealthSnapshot, RecordLog, TailCursor, TailFilter};
pub use memory::{CappedMemoryLog, DEFAULT_CAPACITY_BYTES};
