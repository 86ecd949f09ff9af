#![no_main]

use libfuzzer_sys::fuzz_target;
use tailrpc_codec::{decode_envelope_cbor, encode_envelope_cbor};

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = decode_envelope_cbor(data) {
        let _ = encode_envelope_cbor(&envelope);
    }
});
