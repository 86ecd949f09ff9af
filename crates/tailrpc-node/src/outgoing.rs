use std::fmt;
use std::time::Duration;

use tailrpc_core::{ControlFn, CorrelationId, Value};

use crate::callbacks::{Reply, ReplyHandler};
use crate::context::ReplyContext;
use crate::handler::HandlerError;

/// A message to send, built up before handing it to `RpcEngine::send`.
///
/// Defaults: broadcast recipients, no arguments, the engine's default ttl.
pub struct Outgoing {
    pub(crate) function: String,
    pub(crate) args: Vec<Value>,
    pub(crate) to: Option<String>,
    pub(crate) ttl: Option<Duration>,
    pub(crate) handler: Option<ReplyHandler>,
    pub(crate) correlation: Option<CorrelationId>,
}

impl Outgoing {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args: Vec::new(),
            to: None,
            ttl: None,
            handler: None,
            correlation: None,
        }
    }

    /// A reply-carrying control message echoing the caller's `correlation`.
    pub fn reply_control(control: ControlFn, correlation: CorrelationId) -> Self {
        Self::new(control.as_str()).correlation(correlation)
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args.extend(args);
        self
    }

    /// Sets the arguments from a single value: an array is taken as the
    /// argument list, `null` as no arguments, anything else as one argument.
    pub fn payload(mut self, value: Value) -> Self {
        self.args = match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        self
    }

    /// Comma-separated recipient patterns.
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Lifetime from now; zero makes the message expire immediately.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Registers a handler for replies; a fresh correlation id is allocated.
    pub fn on_reply<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&mut ReplyContext<'_>, Reply) -> Result<(), HandlerError> + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    pub(crate) fn with_handler(mut self, handler: ReplyHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn correlation(mut self, id: CorrelationId) -> Self {
        self.correlation = Some(id);
        self
    }
}

impl fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outgoing")
            .field("function", &self.function)
            .field("args", &self.args)
            .field("to", &self.to)
            .field("ttl", &self.ttl)
            .field("has_handler", &self.handler.is_some())
            .field("correlation", &self.correlation)
            .finish()
    }
}
