#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use tailrpc_codec::decode_envelope_cbor;
use tailrpc_core::{ManualClock, Timestamp};
use tailrpc_log::{CappedMemoryLog, RecordLog};
use tailrpc_node::{EngineConfig, RpcEngine};

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = decode_envelope_cbor(data) else {
        return;
    };

    let clock = Arc::new(ManualClock::new(Timestamp(1_000)));
    let log = Arc::new(CappedMemoryLog::new(clock.clone()));
    let mut engine = RpcEngine::with_clock(EngineConfig::named("B"), log.clone(), clock)
        .expect("valid node name");
    let _ = engine.expose("echo", |_, args| Ok(args.first().cloned().unwrap_or_default()));
    engine.start();

    let _ = log.append(&envelope);
    engine.poll();
    engine.sweep_now();
    assert!(engine.is_started());
});
