use tailrpc_core::{ControlFn, LogRecord, Timestamp, Value};

use crate::callbacks::{ExtendOutcome, InvokeOutcome, Reply};
use crate::context::LifecycleRequest;
use crate::dispatch::Dispatch;
use crate::events::EngineEvent;

impl Dispatch {
    /// Executes the internal action for a reserved control message.
    pub(crate) fn handle_control(
        &mut self,
        control: ControlFn,
        record: &LogRecord,
    ) -> Option<LifecycleRequest> {
        let envelope = &record.envelope;
        match control {
            ControlFn::List => {
                self.reply_with_names(record);
                None
            }
            ControlFn::RpcStarted => {
                self.events.emit(EngineEvent::Started(envelope.from.clone()));
                None
            }
            ControlFn::RpcStopped => {
                self.events.emit(EngineEvent::Stopped(envelope.from.clone()));
                None
            }
            ControlFn::Ping => {
                self.events.emit(EngineEvent::Pinged(envelope.from.clone()));
                self.responder_for(record).reply(envelope.args.clone());
                None
            }
            ControlFn::CbTtlExtend => {
                self.extend_callback(record);
                None
            }
            ControlFn::Cb => self.deliver_reply(record, Reply::Success(envelope.args.clone())),
            ControlFn::CbError => self.deliver_reply(record, Reply::Failure(envelope.args.clone())),
            ControlFn::FnNotExposed => {
                let detail = envelope
                    .args
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or("no detail");
                self.events.emit(EngineEvent::Warning(format!(
                    "function not exposed on {}: {detail}",
                    envelope.from
                )));
                self.deliver_reply(record, Reply::NotExposed(envelope.args.clone()))
            }
        }
    }

    fn extend_callback(&mut self, record: &LogRecord) {
        let envelope = &record.envelope;
        let Some(id) = envelope.cb else {
            self.missing_correlation(record);
            return;
        };
        let Some(proposed) = envelope.args.first().and_then(Value::as_u64) else {
            self.events.emit(EngineEvent::Warning(format!(
                "malformed ttl extension for callback {id} from {}",
                envelope.from
            )));
            return;
        };

        match self.callbacks.extend(id, Timestamp(proposed)) {
            ExtendOutcome::NotFound => self.events.emit(EngineEvent::Warning(format!(
                "callback {id} not found for ttl extension from {}",
                envelope.from
            ))),
            ExtendOutcome::Unchanged => {}
            ExtendOutcome::Extended(callback) => self.events.emit(EngineEvent::Extension {
                from: envelope.from.clone(),
                callback,
            }),
        }
    }

    fn deliver_reply(&mut self, record: &LogRecord, reply: Reply) -> Option<LifecycleRequest> {
        let envelope = &record.envelope;
        let Some(id) = envelope.cb else {
            self.missing_correlation(record);
            return None;
        };

        match self.callbacks.invoke(id, record, reply) {
            InvokeOutcome::NotFound => {
                self.events.emit(EngineEvent::Warning(format!(
                    "callback not found: {id} from {}",
                    envelope.from
                )));
                None
            }
            InvokeOutcome::Delivered(lifecycle) => lifecycle,
            InvokeOutcome::Faulted {
                callback,
                error,
                lifecycle,
            } => {
                self.events.emit(EngineEvent::Error(format!(
                    "callback exception: {error} on {} calling {} on {} reply from {}",
                    self.config.name,
                    callback.function,
                    callback.to.replace('\n', ","),
                    envelope.from
                )));
                lifecycle
            }
        }
    }

    fn missing_correlation(&mut self, record: &LogRecord) {
        self.events.emit(EngineEvent::Warning(format!(
            "{} from {} carries no correlation id",
            record.envelope.function, record.envelope.from
        )));
    }
}
