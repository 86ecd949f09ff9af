use tailrpc_core::{InboundKind, LogRecord, Value};

use crate::callbacks::CallbackRegistry;
use crate::config::EngineConfig;
use crate::context::{CallContext, LifecycleRequest, Outbox, Responder};
use crate::events::{EngineEvent, EventBus};
use crate::exposed::ExposedRegistry;
use crate::handler::run_guarded;

/// Per-node state touched while processing one inbound record.
pub(crate) struct Dispatch {
    pub(crate) config: EngineConfig,
    pub(crate) outbox: Outbox,
    pub(crate) events: EventBus,
    pub(crate) callbacks: CallbackRegistry,
    pub(crate) exposed: ExposedRegistry,
}

impl Dispatch {
    pub(crate) fn responder_for(&self, record: &LogRecord) -> Responder {
        Responder::new(self.outbox.clone(), &record.envelope, self.config.ttl_extension)
    }

    /// Routes one unexpired record to the control handler or an exposed
    /// function.
    pub(crate) fn dispatch(&mut self, record: &LogRecord) -> Option<LifecycleRequest> {
        match record.envelope.kind() {
            InboundKind::Control(control) => self.handle_control(control, record),
            InboundKind::UnknownControl(name) => {
                self.events.emit(EngineEvent::Warning(format!(
                    "unhandled reserved function {name} from {} ignored; names starting with '#' are reserved",
                    record.envelope.from
                )));
                None
            }
            InboundKind::Call(name) => self.call_exposed(name, record),
        }
    }

    fn call_exposed(&mut self, name: &str, record: &LogRecord) -> Option<LifecycleRequest> {
        let responder = self.responder_for(record);
        let from = record.envelope.from.as_str();

        let Some(handler) = self.exposed.get_mut(name) else {
            self.events.emit(EngineEvent::Warning(format!(
                "function not exposed: {name} from {from}"
            )));
            responder.not_exposed(format!("{name} is not exposed on {}", self.config.name));
            return None;
        };

        let mut ctx = CallContext::new(record, responder);
        let args = record.envelope.args.as_slice();
        let result = run_guarded(|| handler(&mut ctx, args));

        match result {
            Ok(value) => {
                if !ctx.reply_suppressed() {
                    ctx.responder().reply(vec![value]);
                }
            }
            Err(err) => {
                self.events.emit(EngineEvent::Error(format!(
                    "function {name} called by {from} failed: {err}"
                )));
                if !ctx.reply_suppressed() {
                    ctx.responder().send_failure(err.to_string());
                }
            }
        }
        ctx.lifecycle()
    }

    pub(crate) fn reply_with_names(&self, record: &LogRecord) {
        let names = self.exposed.names().into_iter().map(Value::String).collect();
        self.responder_for(record).reply(vec![Value::Array(names)]);
    }
}
