use std::collections::HashMap;

use tailrpc_core::{CorrelationId, Envelope, LogRecord, Timestamp, Value};

use crate::context::{LifecycleRequest, ReplyContext};
use crate::handler::{run_guarded, HandlerError};

/// Reply delivered to a registered handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `#cb`: the remote function's result values.
    Success(Vec<Value>),
    /// `#cb_error`: the remote failure detail.
    Failure(Vec<Value>),
    /// `#fn_not_exposed`: the remote had no such function.
    NotExposed(Vec<Value>),
}

impl Reply {
    pub fn args(&self) -> &[Value] {
        match self {
            Reply::Success(args) | Reply::Failure(args) | Reply::NotExposed(args) => args,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Success(_))
    }

    /// Error-first view: `Ok(values)` for a success, `Err(detail)` otherwise.
    pub fn into_result(self) -> Result<Vec<Value>, Vec<Value>> {
        match self {
            Reply::Success(args) => Ok(args),
            Reply::Failure(args) | Reply::NotExposed(args) => Err(args),
        }
    }
}

pub type ReplyHandler =
    Box<dyn FnMut(&mut ReplyContext<'_>, Reply) -> Result<(), HandlerError> + Send>;

/// Read-only view of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackSnapshot {
    pub id: CorrelationId,
    /// Function named by the originating message.
    pub function: String,
    /// Recipients of the originating message, newline-joined.
    pub to: String,
    pub ttl: Timestamp,
    pub invocation_count: u32,
}

struct CallbackEntry {
    handler: ReplyHandler,
    request: Envelope,
    ttl: Timestamp,
    invocation_count: u32,
}

impl CallbackEntry {
    fn snapshot(&self, id: CorrelationId) -> CallbackSnapshot {
        CallbackSnapshot {
            id,
            function: self.request.function.clone(),
            to: self.request.to.clone(),
            ttl: self.ttl,
            invocation_count: self.invocation_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendOutcome {
    NotFound,
    /// Proposed ttl was not later than the current one.
    Unchanged,
    Extended(CallbackSnapshot),
}

#[derive(Debug)]
pub(crate) enum InvokeOutcome {
    NotFound,
    Delivered(Option<LifecycleRequest>),
    Faulted {
        callback: CallbackSnapshot,
        error: HandlerError,
        lifecycle: Option<LifecycleRequest>,
    },
}

/// Outstanding request to reply correlations owned by the sending node.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: HashMap<CorrelationId, CallbackEntry>,
}

impl CallbackRegistry {
    /// Allocates a fresh correlation id, stamps it on `request` and stores
    /// the entry with the request's ttl.
    pub fn register(&mut self, request: &mut Envelope, handler: ReplyHandler) -> CorrelationId {
        let mut id = CorrelationId::generate();
        while self.entries.contains_key(&id) {
            id = CorrelationId::generate();
        }
        request.cb = Some(id);
        self.entries.insert(
            id,
            CallbackEntry {
                handler,
                request: request.clone(),
                ttl: request.ttl,
                invocation_count: 0,
            },
        );
        id
    }

    pub fn resolve(&self, id: CorrelationId) -> Option<CallbackSnapshot> {
        self.entries.get(&id).map(|entry| entry.snapshot(id))
    }

    /// Advances the entry's ttl only if `proposed` is strictly later.
    pub fn extend(&mut self, id: CorrelationId, proposed: Timestamp) -> ExtendOutcome {
        let Some(entry) = self.entries.get_mut(&id) else {
            return ExtendOutcome::NotFound;
        };
        if proposed <= entry.ttl {
            return ExtendOutcome::Unchanged;
        }
        entry.ttl = proposed;
        ExtendOutcome::Extended(entry.snapshot(id))
    }

    /// Removes every entry whose ttl is before `now` and returns them.
    pub fn sweep(&mut self, now: Timestamp) -> Vec<CallbackSnapshot> {
        let expired: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.ttl < now)
            .map(|(id, _)| *id)
            .collect();
        let mut removed: Vec<CallbackSnapshot> = expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|entry| entry.snapshot(id)))
            .collect();
        removed.sort_by_key(|snapshot| (snapshot.ttl, snapshot.id));
        removed
    }

    /// Delivers `reply` to the handler registered under `id`.
    ///
    /// The invocation count is incremented before the handler runs; handler
    /// failures and panics are returned, never propagated.
    pub(crate) fn invoke(&mut self, id: CorrelationId, record: &LogRecord, reply: Reply) -> InvokeOutcome {
        let Some(entry) = self.entries.get_mut(&id) else {
            return InvokeOutcome::NotFound;
        };
        entry.invocation_count = entry.invocation_count.saturating_add(1);

        let CallbackEntry {
            handler, request, ..
        } = entry;
        let mut ctx = ReplyContext::new(request, record);
        let result = run_guarded(|| handler(&mut ctx, reply));
        let lifecycle = ctx.lifecycle();

        match result {
            Ok(()) => InvokeOutcome::Delivered(lifecycle),
            Err(error) => InvokeOutcome::Faulted {
                callback: entry.snapshot(id),
                error,
                lifecycle,
            },
        }
    }

    pub fn remove(&mut self, id: CorrelationId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
