use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info, warn};

use crate::callbacks::CallbackSnapshot;

/// Notifications delivered to the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Error(String),
    Warning(String),
    /// A node started consuming; carries its name.
    Started(String),
    /// A node stopped consuming; carries its name.
    Stopped(String),
    /// An outstanding callback had its ttl pushed back by the replier.
    Extension {
        from: String,
        callback: CallbackSnapshot,
    },
    /// A peer probed this node; carries the peer name.
    Pinged(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Error,
    Warning,
    Started,
    Stopped,
    Extension,
    Pinged,
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::Error(_) => EventKind::Error,
            EngineEvent::Warning(_) => EventKind::Warning,
            EngineEvent::Started(_) => EventKind::Started,
            EngineEvent::Stopped(_) => EventKind::Stopped,
            EngineEvent::Extension { .. } => EventKind::Extension,
            EngineEvent::Pinged(_) => EventKind::Pinged,
        }
    }
}

pub type Listener = Box<dyn FnMut(&EngineEvent) + Send>;

/// Shared queue that detached responders report into.
#[derive(Clone, Default)]
pub(crate) struct EventSink {
    queue: Arc<Mutex<VecDeque<EngineEvent>>>,
}

impl EventSink {
    pub(crate) fn push(&self, event: EngineEvent) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
    }

    fn drain(&self) -> Vec<EngineEvent> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }
}

/// Listener registry keyed by event kind.
pub(crate) struct EventBus {
    node: String,
    listeners: Vec<(Option<EventKind>, Listener)>,
    sink: EventSink,
}

impl EventBus {
    pub(crate) fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            listeners: Vec::new(),
            sink: EventSink::default(),
        }
    }

    pub(crate) fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    pub(crate) fn on(&mut self, kind: Option<EventKind>, listener: Listener) {
        self.listeners.push((kind, listener));
    }

    pub(crate) fn emit(&mut self, event: EngineEvent) {
        self.sink.push(event);
        self.flush();
    }

    /// Delivers everything queued so far, including events queued by
    /// responders since the last flush.
    pub(crate) fn flush(&mut self) {
        loop {
            let batch = self.sink.drain();
            if batch.is_empty() {
                return;
            }
            for event in batch {
                self.log(&event);
                let kind = event.kind();
                for (filter, listener) in &mut self.listeners {
                    if filter.map_or(true, |k| k == kind) {
                        listener(&event);
                    }
                }
            }
        }
    }

    fn log(&self, event: &EngineEvent) {
        let node = self.node.as_str();
        match event {
            EngineEvent::Error(message) => error!(node, "{message}"),
            EngineEvent::Warning(message) => warn!(node, "{message}"),
            EngineEvent::Started(peer) => info!(node, peer = %peer, "rpc started"),
            EngineEvent::Stopped(peer) => info!(node, peer = %peer, "rpc stopped"),
            EngineEvent::Extension { from, callback } => info!(
                node,
                from = %from,
                cb = %callback.id,
                ttl = %callback.ttl,
                "callback ttl extended"
            ),
            EngineEvent::Pinged(peer) => info!(node, peer = %peer, "pinged"),
        }
    }
}
