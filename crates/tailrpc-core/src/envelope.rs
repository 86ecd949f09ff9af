use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CorrelationId, RecordId, Timestamp};

/// Leading character of every reserved control function name.
pub const CONTROL_PREFIX: char = '#';
/// Recipient pattern addressing every node.
pub const BROADCAST: &str = "*";

/// Reserved control messages consumed by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlFn {
    /// Discovery: reply with the exposed function names.
    List,
    /// A peer announced that it started consuming.
    RpcStarted,
    /// A peer announced that it stopped consuming.
    RpcStopped,
    /// Liveness probe; replied to by echoing the arguments.
    Ping,
    /// Request to push back the ttl of an outstanding callback.
    CbTtlExtend,
    /// Successful reply to a call.
    Cb,
    /// Failed reply to a call.
    CbError,
    /// The remote node has no function with the requested name.
    FnNotExposed,
}

impl ControlFn {
    pub const ALL: [ControlFn; 8] = [
        ControlFn::List,
        ControlFn::RpcStarted,
        ControlFn::RpcStopped,
        ControlFn::Ping,
        ControlFn::CbTtlExtend,
        ControlFn::Cb,
        ControlFn::CbError,
        ControlFn::FnNotExposed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ControlFn::List => "#list",
            ControlFn::RpcStarted => "#rpc_started",
            ControlFn::RpcStopped => "#rpc_stopped",
            ControlFn::Ping => "#ping",
            ControlFn::CbTtlExtend => "#cb_ttl_extend",
            ControlFn::Cb => "#cb",
            ControlFn::CbError => "#cb_error",
            ControlFn::FnNotExposed => "#fn_not_exposed",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// Whether the envelope's `cb` carries the *caller's* correlation id
    /// instead of a freshly allocated one.
    ///
    /// `#fn_not_exposed` is included so the caller's handler can be resolved.
    pub const fn echoes_correlation(self) -> bool {
        matches!(
            self,
            ControlFn::Cb | ControlFn::CbError | ControlFn::CbTtlExtend | ControlFn::FnNotExposed
        )
    }
}

/// Whether `name` lies in the reserved control namespace.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(CONTROL_PREFIX)
}

/// Inbound classification, resolved once per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind<'a> {
    Control(ControlFn),
    /// Reserved prefix but not a known control message.
    UnknownControl(&'a str),
    /// Call to a user-exposed function.
    Call(&'a str),
}

/// The unit written to and read from the shared log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Function to invoke, or a reserved control name.
    #[serde(rename = "fn")]
    pub function: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Sender node name.
    pub from: String,
    /// Newline-joined recipient patterns.
    pub to: String,
    /// Correlation id, present iff a reply is expected (or echoed).
    #[serde(default)]
    pub cb: Option<CorrelationId>,
    /// Absolute expiry; receivers ignore the record after this instant.
    pub ttl: Timestamp,
}

impl Envelope {
    pub fn kind(&self) -> InboundKind<'_> {
        if !is_reserved(&self.function) {
            return InboundKind::Call(&self.function);
        }
        match ControlFn::parse(&self.function) {
            Some(control) => InboundKind::Control(control),
            None => InboundKind::UnknownControl(&self.function),
        }
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.ttl < now
    }

    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to.lines()
    }
}

/// An envelope as stored by the log, with its log-assigned identity.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub id: RecordId,
    pub envelope: Envelope,
}

impl LogRecord {
    /// Creation time taken from the record identity, not from the sender.
    pub fn created(&self) -> Timestamp {
        self.id.created
    }
}

/// Converts comma-separated recipients into the newline-joined stored form.
///
/// Entries are trimmed and empty entries dropped.
pub fn join_recipients(to: &str) -> String {
    to.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
