use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tailrpc_core::{Clock, ControlFn, CorrelationId, Envelope, LogRecord, RecordId, Timestamp, Value};
use tailrpc_log::RecordLog;
use tracing::debug;

use crate::events::{EngineEvent, EventSink};

/// Engine lifecycle change requested from inside a handler.
///
/// Applied once the record being processed completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleRequest {
    Stop,
    Pause,
    Restart,
}

/// Write side of one node: builds envelopes stamped with the node name and
/// appends them, reporting persist failures as error events.
#[derive(Clone)]
pub(crate) struct Outbox {
    log: Arc<dyn RecordLog>,
    clock: Arc<dyn Clock>,
    name: String,
    default_ttl: Duration,
    sink: EventSink,
}

impl Outbox {
    pub(crate) fn new(
        log: Arc<dyn RecordLog>,
        clock: Arc<dyn Clock>,
        name: String,
        default_ttl: Duration,
        sink: EventSink,
    ) -> Self {
        Self {
            log,
            clock,
            name,
            default_ttl,
            sink,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) fn envelope(
        &self,
        function: String,
        args: Vec<Value>,
        to: String,
        cb: Option<CorrelationId>,
        ttl: Option<Duration>,
    ) -> Envelope {
        Envelope {
            function,
            args,
            from: self.name.clone(),
            to,
            cb,
            ttl: self.now().saturating_add(ttl.unwrap_or(self.default_ttl)),
        }
    }

    /// Appends `envelope`; a failure is queued as an error event.
    pub(crate) fn post(&self, envelope: &Envelope) -> Option<RecordId> {
        match self.log.append(envelope) {
            Ok(id) => {
                debug!(
                    node = %self.name,
                    function = %envelope.function,
                    record = %id,
                    "appended message"
                );
                Some(id)
            }
            Err(err) => {
                self.sink.push(EngineEvent::Error(format!(
                    "failed to persist {} to {}: {err}",
                    envelope.function,
                    envelope.to.replace('\n', ",")
                )));
                None
            }
        }
    }

    pub(crate) fn report(&self, event: EngineEvent) {
        self.sink.push(event);
    }
}

/// Reply channel bound to one inbound call.
///
/// Cloneable and owned, so a handler may keep it and answer later. Every
/// method is a no-op on the wire when the call carried no correlation id or
/// came from this node itself.
#[derive(Clone)]
pub struct Responder {
    outbox: Outbox,
    caller: String,
    function: String,
    correlation: Option<CorrelationId>,
    request_ttl: Arc<AtomicU64>,
    ttl_extension: Duration,
    replied: Arc<AtomicBool>,
}

impl Responder {
    pub(crate) fn new(outbox: Outbox, request: &Envelope, ttl_extension: Duration) -> Self {
        Self {
            outbox,
            caller: request.from.clone(),
            function: request.function.clone(),
            correlation: request.cb,
            request_ttl: Arc::new(AtomicU64::new(request.ttl.as_millis())),
            ttl_extension,
            replied: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether replies from this responder reach anyone.
    pub fn is_bound(&self) -> bool {
        self.correlation.is_some() && self.caller != self.outbox.name()
    }

    pub fn has_replied(&self) -> bool {
        self.replied.load(Ordering::SeqCst)
    }

    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub fn correlation(&self) -> Option<CorrelationId> {
        self.correlation
    }

    /// The call's ttl as seen by this responder, including extensions.
    pub fn request_ttl(&self) -> Timestamp {
        Timestamp(self.request_ttl.load(Ordering::SeqCst))
    }

    /// Sends `#cb` with `args` to the caller.
    pub fn reply(&self, args: Vec<Value>) {
        if !self.is_bound() {
            return;
        }
        self.replied.store(true, Ordering::SeqCst);
        self.post(ControlFn::Cb, args);
    }

    /// Signals a local error and sends `#cb_error` to the caller.
    pub fn fail(&self, error: impl fmt::Display) {
        let message = error.to_string();
        self.outbox.report(EngineEvent::Error(format!(
            "function {} called by {} failed: {message}",
            self.function, self.caller
        )));
        self.send_failure(message);
    }

    /// Pushes the call's ttl back by `by` (the configured step when zero) and
    /// asks the caller to keep its callback alive until then.
    pub fn extend_ttl(&self, by: Duration) -> Timestamp {
        let step = if by.is_zero() { self.ttl_extension } else { by };
        let step = u64::try_from(step.as_millis()).unwrap_or(u64::MAX);
        let previous = self
            .request_ttl
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |ttl| {
                Some(ttl.saturating_add(step))
            })
            .unwrap_or_else(|ttl| ttl);
        let extended = Timestamp(previous.saturating_add(step));
        if self.is_bound() {
            self.post(ControlFn::CbTtlExtend, vec![Value::from(extended.as_millis())]);
        }
        extended
    }

    pub(crate) fn send_failure(&self, message: String) {
        if !self.is_bound() {
            return;
        }
        self.replied.store(true, Ordering::SeqCst);
        self.post(ControlFn::CbError, vec![Value::String(message)]);
    }

    pub(crate) fn not_exposed(&self, diagnostic: String) {
        if !self.is_bound() {
            return;
        }
        self.post(ControlFn::FnNotExposed, vec![Value::String(diagnostic)]);
    }

    fn post(&self, control: ControlFn, args: Vec<Value>) {
        let envelope = self.outbox.envelope(
            control.as_str().to_string(),
            args,
            self.caller.clone(),
            self.correlation,
            None,
        );
        self.outbox.post(&envelope);
    }
}

/// Context handed to an exposed function for one inbound call.
pub struct CallContext<'a> {
    record: &'a LogRecord,
    responder: Responder,
    deferred: bool,
    lifecycle: Option<LifecycleRequest>,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(record: &'a LogRecord, responder: Responder) -> Self {
        Self {
            record,
            responder,
            deferred: false,
            lifecycle: None,
        }
    }

    pub fn message(&self) -> &'a Envelope {
        &self.record.envelope
    }

    pub fn record(&self) -> &'a LogRecord {
        self.record
    }

    pub fn from(&self) -> &'a str {
        &self.record.envelope.from
    }

    pub fn args(&self) -> &'a [Value] {
        &self.record.envelope.args
    }

    /// Replies now; the return value of the handler is then not sent.
    pub fn reply(&self, args: Vec<Value>) {
        self.responder.reply(args);
    }

    pub fn fail(&self, error: impl fmt::Display) {
        self.responder.fail(error);
    }

    pub fn extend_ttl(&self, by: Duration) -> Timestamp {
        self.responder.extend_ttl(by)
    }

    /// Takes over the reply: the engine will not reply automatically and the
    /// returned responder may answer after the handler returns.
    pub fn defer(&mut self) -> Responder {
        self.deferred = true;
        self.responder.clone()
    }

    pub fn stop_engine(&mut self) {
        self.lifecycle = Some(LifecycleRequest::Stop);
    }

    pub fn pause_engine(&mut self) {
        self.lifecycle = Some(LifecycleRequest::Pause);
    }

    pub fn restart_engine(&mut self) {
        self.lifecycle = Some(LifecycleRequest::Restart);
    }

    pub(crate) fn responder(&self) -> &Responder {
        &self.responder
    }

    pub(crate) fn reply_suppressed(&self) -> bool {
        self.deferred || self.responder.has_replied()
    }

    pub(crate) fn lifecycle(&self) -> Option<LifecycleRequest> {
        self.lifecycle
    }
}

/// Context handed to a reply handler: the message it sent and the reply.
pub struct ReplyContext<'a> {
    request: &'a Envelope,
    reply: &'a LogRecord,
    lifecycle: Option<LifecycleRequest>,
}

impl<'a> ReplyContext<'a> {
    pub(crate) fn new(request: &'a Envelope, reply: &'a LogRecord) -> Self {
        Self {
            request,
            reply,
            lifecycle: None,
        }
    }

    /// The outgoing message the handler was registered for.
    pub fn request(&self) -> &'a Envelope {
        self.request
    }

    /// The incoming reply record.
    pub fn reply(&self) -> &'a LogRecord {
        self.reply
    }

    /// Name of the node that replied.
    pub fn replier(&self) -> &'a str {
        &self.reply.envelope.from
    }

    pub fn stop_engine(&mut self) {
        self.lifecycle = Some(LifecycleRequest::Stop);
    }

    pub fn pause_engine(&mut self) {
        self.lifecycle = Some(LifecycleRequest::Pause);
    }

    pub fn restart_engine(&mut self) {
        self.lifecycle = Some(LifecycleRequest::Restart);
    }

    pub(crate) fn lifecycle(&self) -> Option<LifecycleRequest> {
        self.lifecycle
    }
}
