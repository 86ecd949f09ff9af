use thiserror::Error;

/// Errors returned by envelope codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// CBOR serialization failure.
    #[error("encode error: {0}")]
    Encode(String),
    /// CBOR deserialization failure.
    #[error("decode error: {0}")]
    Decode(String),
    /// Envelope-level schema validation failure.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(&'static str),
}
