#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tailrpc_core::{ManualClock, Timestamp};
use tailrpc_log::CappedMemoryLog;
use tailrpc_node::{EngineConfig, EngineEvent, RpcEngine};

pub const T0: Timestamp = Timestamp(1_700_000_000_000);

pub struct Network {
    pub clock: ManualClock,
    pub log: CappedMemoryLog,
}

impl Network {
    pub fn new() -> Self {
        let clock = ManualClock::new(T0);
        let log = CappedMemoryLog::new(Arc::new(clock.clone()));
        Self { clock, log }
    }

    pub fn engine(&self, name: &str) -> RpcEngine {
        self.engine_with(EngineConfig::named(name))
    }

    pub fn engine_with(&self, config: EngineConfig) -> RpcEngine {
        RpcEngine::with_clock(config, Arc::new(self.log.clone()), Arc::new(self.clock.clone()))
            .expect("valid engine config")
    }

    /// Records appended with function name `function`.
    pub fn sent(&self, function: &str) -> usize {
        self.log
            .records()
            .iter()
            .filter(|r| r.envelope.function == function)
            .count()
    }
}

pub type Events = Arc<Mutex<Vec<EngineEvent>>>;

pub fn record_events(engine: &mut RpcEngine) -> Events {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    engine.on_any(move |event| sink.lock().expect("events lock").push(event.clone()));
    events
}

pub fn warnings(events: &Events) -> Vec<String> {
    events
        .lock()
        .expect("events lock")
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Warning(msg) => Some(msg.clone()),
            _ => None,
        })
        .collect()
}

pub fn errors(events: &Events) -> Vec<String> {
    events
        .lock()
        .expect("events lock")
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Error(msg) => Some(msg.clone()),
            _ => None,
        })
        .collect()
}

pub fn count_matching(messages: &[String], needle: &str) -> usize {
    messages.iter().filter(|m| m.contains(needle)).count()
}

pub fn shared<T>(value: T) -> Arc<Mutex<T>> {
    Arc::new(Mutex::new(value))
}
