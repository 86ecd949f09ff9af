use tailrpc_core::CoreError;
use thiserror::Error;

/// Usage errors reported synchronously by the engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("invalid send: {0}")]
    InvalidSend(&'static str),
    #[error("cannot expose function {name:?}: {reason}")]
    InvalidFunctionName { name: String, reason: &'static str },
}
