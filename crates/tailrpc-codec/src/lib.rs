//! Wire encoding for tailrpc envelopes.

pub mod envelope;
pub mod error;

pub use envelope::{decode_envelope_cbor, encode_envelope_cbor, validate_envelope};
pub use error::CodecError;
