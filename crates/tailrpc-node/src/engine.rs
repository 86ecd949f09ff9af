use std::sync::Arc;
use std::time::Duration;

use tailrpc_core::{
    join_recipients, AddressPattern, Clock, ControlFn, CorrelationId, SystemClock, Timestamp,
    Value, BROADCAST,
};
use tailrpc_log::{CursorPoll, RecordLog, TailFilter};
use tracing::{debug, info};

use crate::callbacks::{CallbackRegistry, CallbackSnapshot, Reply, ReplyHandler};
use crate::config::EngineConfig;
use crate::consumer::{ConsumerState, TailingConsumer};
use crate::context::{CallContext, LifecycleRequest, Outbox, ReplyContext};
use crate::dispatch::Dispatch;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus, EventKind};
use crate::exposed::{ExposedRegistry, FunctionHandler};
use crate::handler::HandlerError;
use crate::outgoing::Outgoing;

/// Summary of one `poll` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    /// Records handed to the control handler or an exposed function.
    pub dispatched: usize,
    /// Records dropped because their ttl had passed.
    pub expired: usize,
    /// Sweeps that ran during this poll (zero or one).
    pub sweeps: usize,
    /// Callback entries removed by those sweeps.
    pub swept: usize,
    /// The subscription closed or failed and the engine stopped.
    pub stream_ended: bool,
}

/// RPC engine for one named node over a shared record log.
///
/// The engine is host-driven: `poll` processes pending records to completion
/// one at a time and runs the callback sweep when it is due.
pub struct RpcEngine {
    dispatch: Dispatch,
    log: Arc<dyn RecordLog>,
    clock: Arc<dyn Clock>,
    pattern: AddressPattern,
    consumer: TailingConsumer,
}

impl RpcEngine {
    pub fn new(config: EngineConfig, log: Arc<dyn RecordLog>) -> Result<Self, EngineError> {
        Self::with_clock(config, log, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        log: Arc<dyn RecordLog>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let pattern = AddressPattern::for_name(&config.name)?;
        let events = EventBus::new(config.name.clone());
        let outbox = Outbox::new(
            Arc::clone(&log),
            Arc::clone(&clock),
            config.name.clone(),
            config.default_ttl,
            events.sink(),
        );
        let consumer = TailingConsumer::new(config.sweep_interval);
        Ok(Self {
            dispatch: Dispatch {
                config,
                outbox,
                events,
                callbacks: CallbackRegistry::default(),
                exposed: ExposedRegistry::default(),
            },
            log,
            clock,
            pattern,
            consumer,
        })
    }

    pub fn name(&self) -> &str {
        &self.dispatch.config.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.dispatch.config
    }

    /// Registers a listener for one kind of event.
    pub fn on<F>(&mut self, kind: EventKind, listener: F)
    where
        F: FnMut(&EngineEvent) + Send + 'static,
    {
        self.dispatch.events.on(Some(kind), Box::new(listener));
    }

    /// Registers a listener for every event.
    pub fn on_any<F>(&mut self, listener: F)
    where
        F: FnMut(&EngineEvent) + Send + 'static,
    {
        self.dispatch.events.on(None, Box::new(listener));
    }

    pub fn expose<F>(&mut self, name: impl Into<String>, handler: F) -> Result<(), EngineError>
    where
        F: FnMut(&mut CallContext<'_>, &[Value]) -> Result<Value, HandlerError> + Send + 'static,
    {
        self.dispatch.exposed.expose(name, Box::new(handler))
    }

    pub fn conceal(&mut self, name: &str) -> bool {
        self.dispatch.exposed.conceal(name)
    }

    /// Replaces every exposed function at once.
    pub fn context(
        &mut self,
        functions: impl IntoIterator<Item = (String, FunctionHandler)>,
    ) -> Result<(), EngineError> {
        self.dispatch.exposed.replace_all(functions)
    }

    pub fn exposed_names(&self) -> Vec<String> {
        self.dispatch.exposed.names()
    }

    /// Builds and appends `message`.
    ///
    /// Returns the allocated correlation id when a reply handler was given.
    /// Persist failures are reported as error events, in which case the
    /// handler is dropped and `None` is returned.
    pub fn send(&mut self, message: Outgoing) -> Result<Option<CorrelationId>, EngineError> {
        let result = self.send_inner(message);
        self.dispatch.events.flush();
        result
    }

    fn send_inner(&mut self, message: Outgoing) -> Result<Option<CorrelationId>, EngineError> {
        let Outgoing {
            function,
            args,
            to,
            ttl,
            handler,
            correlation,
        } = message;

        if function.is_empty() {
            return Err(EngineError::InvalidSend("function name must not be empty"));
        }
        let echoes = ControlFn::parse(&function).is_some_and(ControlFn::echoes_correlation);
        if echoes && correlation.is_none() {
            return Err(EngineError::InvalidSend(
                "reply control messages must carry the caller's correlation id",
            ));
        }
        if echoes && handler.is_some() {
            return Err(EngineError::InvalidSend(
                "reply control messages cannot register a reply handler",
            ));
        }
        if !echoes && correlation.is_some() {
            return Err(EngineError::InvalidSend(
                "only reply control messages may carry an explicit correlation id",
            ));
        }
        let to = join_recipients(to.as_deref().unwrap_or(BROADCAST));
        if to.is_empty() {
            return Err(EngineError::InvalidSend("no recipients"));
        }

        let mut envelope = self.dispatch.outbox.envelope(function, args, to, correlation, ttl);
        let registered = handler.map(|handler| self.dispatch.callbacks.register(&mut envelope, handler));

        if self.dispatch.outbox.post(&envelope).is_none() {
            if let Some(id) = registered {
                self.dispatch.callbacks.remove(id);
            }
            return Ok(None);
        }
        Ok(registered)
    }

    /// Probes `to` and logs each responder's round-trip latency.
    pub fn ping(&mut self, to: &str) -> Result<Option<CorrelationId>, EngineError> {
        self.ping_inner(to, None)
    }

    /// Probes `to`, calling `on_latency(latency, responder)` for each reply.
    pub fn ping_with<F>(&mut self, to: &str, on_latency: F) -> Result<Option<CorrelationId>, EngineError>
    where
        F: FnMut(Duration, &str) + Send + 'static,
    {
        self.ping_inner(to, Some(Box::new(on_latency)))
    }

    fn ping_inner(
        &mut self,
        to: &str,
        mut on_latency: Option<Box<dyn FnMut(Duration, &str) + Send>>,
    ) -> Result<Option<CorrelationId>, EngineError> {
        let clock = Arc::clone(&self.clock);
        let started = clock.now();
        let handler: ReplyHandler = Box::new(move |ctx: &mut ReplyContext<'_>, _reply: Reply| {
            let latency = clock.now().saturating_duration_since(started);
            match on_latency.as_mut() {
                Some(on_latency) => on_latency(latency, ctx.replier()),
                None => info!("Ping to {} took {} ms.", ctx.replier(), latency.as_millis()),
            }
            Ok(())
        });
        self.send(
            Outgoing::new(ControlFn::Ping.as_str())
                .to(to)
                .with_handler(handler),
        )
    }

    /// Starts consuming. No-op unless stopped.
    ///
    /// The start is announced only once the subscription is open. A
    /// subscription failure is reported as an error event and leaves the
    /// engine stopped and unannounced.
    pub fn start(&mut self) {
        if self.consumer.state() != ConsumerState::Stopped {
            return;
        }
        self.consumer.begin();
        let name = self.name().to_string();
        let now = self.clock.now();
        let filter = TailFilter {
            exclude_from: name.clone(),
            recipients: self.pattern.clone(),
            not_expired_at: now,
            after: None,
        };
        if let Err(err) = self.consumer.open(self.log.as_ref(), filter, now) {
            self.dispatch.events.emit(EngineEvent::Error(format!(
                "failed to open tail subscription: {err}"
            )));
            return;
        }
        debug!(node = %name, pattern = %self.pattern.as_str(), "tail subscription opened");

        self.dispatch.events.emit(EngineEvent::Started(name));
        let _ = self.send_inner(Outgoing::new(ControlFn::RpcStarted.as_str()));
        self.dispatch.events.flush();
    }

    /// Stops consuming and drops every outstanding callback. Idempotent.
    pub fn stop(&mut self) {
        if self.teardown() {
            self.dispatch.callbacks.clear();
        }
        self.dispatch.events.flush();
    }

    /// Stops then starts again, keeping outstanding callbacks.
    pub fn restart(&mut self) {
        self.teardown();
        self.start();
    }

    /// Suspends delivery and the sweep without releasing the subscription.
    pub fn pause(&mut self) {
        if self.consumer.pause() {
            debug!(node = %self.name(), "consumer paused");
        }
    }

    pub fn resume(&mut self) {
        let now = self.clock.now();
        if self.consumer.resume(now) {
            debug!(node = %self.name(), "consumer resumed");
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(
            self.consumer.state(),
            ConsumerState::Running | ConsumerState::Paused
        )
    }

    pub fn is_paused(&self) -> bool {
        self.consumer.state() == ConsumerState::Paused
    }

    pub fn state(&self) -> ConsumerState {
        self.consumer.state()
    }

    /// Overrides the recipient pattern; takes effect at the next start.
    pub fn set_address_pattern(&mut self, pattern: AddressPattern) {
        self.pattern = pattern;
    }

    pub fn address_pattern(&self) -> &AddressPattern {
        &self.pattern
    }

    pub fn pending_callbacks(&self) -> usize {
        self.dispatch.callbacks.len()
    }

    pub fn callback(&self, id: CorrelationId) -> Option<CallbackSnapshot> {
        self.dispatch.callbacks.resolve(id)
    }

    pub fn sweep_scheduled(&self) -> bool {
        self.consumer.sweep().is_armed()
    }

    /// Processes pending records, then runs the sweep if it is due.
    pub fn poll(&mut self) -> PollReport {
        let mut report = PollReport::default();
        let limit = self.dispatch.config.max_records_per_poll.max(1);

        while report.dispatched + report.expired < limit {
            let Some(next) = self.consumer.next() else {
                break;
            };
            match next {
                CursorPoll::Record(record) => {
                    self.consumer.mark_dispatched(record.id);
                    let envelope = &record.envelope;
                    if envelope.is_expired_at(self.clock.now()) {
                        report.expired += 1;
                        self.dispatch.events.emit(EngineEvent::Warning(format!(
                            "old message \"{}\" from {} ignored as it is too old",
                            envelope.function, envelope.from
                        )));
                        continue;
                    }
                    report.dispatched += 1;
                    let lifecycle = self.dispatch.dispatch(&record);
                    self.dispatch.events.flush();
                    if let Some(request) = lifecycle {
                        self.apply_lifecycle(request);
                    }
                }
                CursorPoll::Idle => break,
                CursorPoll::Closed => {
                    self.dispatch
                        .events
                        .emit(EngineEvent::Warning("tail stream closed".to_string()));
                    self.teardown();
                    report.stream_ended = true;
                    break;
                }
                CursorPoll::Failed(err) => {
                    self.dispatch
                        .events
                        .emit(EngineEvent::Error(format!("tail stream failed: {err}")));
                    self.teardown();
                    report.stream_ended = true;
                    break;
                }
            }
        }

        let now = self.clock.now();
        if self.consumer.sweep_due(now) {
            report.sweeps += 1;
            report.swept += self.run_sweep(now);
        }
        self.dispatch.events.flush();
        report
    }

    /// Runs a sweep immediately regardless of the schedule.
    pub fn sweep_now(&mut self) -> usize {
        let now = self.clock.now();
        let removed = self.run_sweep(now);
        self.dispatch.events.flush();
        removed
    }

    fn run_sweep(&mut self, now: Timestamp) -> usize {
        let removed = self.dispatch.callbacks.sweep(now);
        for callback in removed.iter().filter(|c| c.invocation_count == 0) {
            self.dispatch.events.emit(EngineEvent::Warning(format!(
                "unhandled callback for {} to {}",
                callback.function,
                callback.to.replace('\n', ",")
            )));
        }
        removed.len()
    }

    fn apply_lifecycle(&mut self, request: LifecycleRequest) {
        debug!(node = %self.name(), ?request, "applying handler lifecycle request");
        match request {
            LifecycleRequest::Stop => self.stop(),
            LifecycleRequest::Pause => self.pause(),
            LifecycleRequest::Restart => self.restart(),
        }
    }

    /// Announces the stop and releases the subscription. Returns false when
    /// already stopped.
    fn teardown(&mut self) -> bool {
        if self.consumer.state() == ConsumerState::Stopped {
            return false;
        }
        self.consumer.release();
        let name = self.name().to_string();
        self.dispatch.events.emit(EngineEvent::Stopped(name));
        let _ = self.send_inner(Outgoing::new(ControlFn::RpcStopped.as_str()));
        true
    }
}

impl Drop for RpcEngine {
    fn drop(&mut self) {
        self.consumer.release();
    }
}
