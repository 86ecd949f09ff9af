use tailrpc_core::envelope::{Envelope, InboundKind};

use crate::error::CodecError;

/// Checks the structural rules every stored envelope must satisfy.
pub fn validate_envelope(envelope: &Envelope) -> Result<(), CodecError> {
    if envelope.function.is_empty() {
        return Err(CodecError::InvalidEnvelope("fn must not be empty"));
    }
    if envelope.from.is_empty() {
        return Err(CodecError::InvalidEnvelope("from must not be empty"));
    }
    if envelope.to.is_empty() {
        return Err(CodecError::InvalidEnvelope("to must not be empty"));
    }
    if let InboundKind::Control(control) = envelope.kind() {
        if control.echoes_correlation() && envelope.cb.is_none() {
            return Err(CodecError::InvalidEnvelope(
                "reply control message without correlation id",
            ));
        }
    }
    Ok(())
}

/// Encodes an envelope as CBOR after validation.
pub fn encode_envelope_cbor(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    validate_envelope(envelope)?;
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(envelope, &mut bytes)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes and validates one CBOR envelope.
pub fn decode_envelope_cbor(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let envelope: Envelope =
        ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
    validate_envelope(&envelope)?;
    Ok(envelope)
}
