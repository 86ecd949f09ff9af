//! tailrpc node-layer engine.
//!
//! This crate layers the RPC protocol over a shared capped log: callback
//! routing with ttl expiry, the reserved control messages, exposed function
//! dispatch, and the tailing consumer lifecycle.

pub mod callbacks;
pub mod config;
pub mod consumer;
pub mod context;
mod control;
mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod exposed;
pub mod handler;
pub mod outgoing;

pub use callbacks::{CallbackRegistry, CallbackSnapshot, ExtendOutcome, Reply, ReplyHandler};
pub use config::EngineConfig;
pub use consumer::{ConsumerState, SweepTimer};
pub use context::{CallContext, LifecycleRequest, ReplyContext, Responder};
pub use engine::{PollReport, RpcEngine};
pub use error::EngineError;
pub use events::{EngineEvent, EventKind};
pub use exposed::{function, ExposedRegistry, FunctionHandler};
pub use handler::{arg, HandlerError};
pub use outgoing::Outgoing;
