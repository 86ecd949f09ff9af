use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::de::DeserializeOwned;
use tailrpc_core::Value;
use thiserror::Error;

/// Failure raised by an exposed function or a reply handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("argument {index}: {reason}")]
    InvalidArgument { index: usize, reason: String },
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Decodes positional argument `index`.
///
/// A missing argument decodes as `null`, so `Option<T>` accepts it.
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T, HandlerError> {
    T::deserialize(args.get(index).unwrap_or(&Value::Null)).map_err(|err| {
        HandlerError::InvalidArgument {
            index,
            reason: err.to_string(),
        }
    })
}

/// Runs a handler, converting a panic into `HandlerError::Panicked`.
pub(crate) fn run_guarded<R>(f: impl FnOnce() -> Result<R, HandlerError>) -> Result<R, HandlerError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{arg, run_guarded, HandlerError};

    #[test]
    fn arg_decodes_positionally() {
        let args = vec![json!(2), json!("x"), json!([1, 2])];
        assert_eq!(arg::<i64>(&args, 0), Ok(2));
        assert_eq!(arg::<String>(&args, 1), Ok("x".to_string()));
        assert_eq!(arg::<Vec<u8>>(&args, 2), Ok(vec![1, 2]));
        assert_eq!(arg::<Option<i64>>(&args, 7), Ok(None));
    }

    #[test]
    fn arg_reports_index_on_mismatch() {
        let args = vec![json!("not a number")];
        let err = arg::<i64>(&args, 0).expect_err("string is not an i64");
        assert!(matches!(err, HandlerError::InvalidArgument { index: 0, .. }));
        assert!(arg::<i64>(&args, 3).is_err());
    }

    #[test]
    fn run_guarded_contains_panics() {
        let ok = run_guarded(|| Ok::<_, HandlerError>(5));
        assert_eq!(ok, Ok(5));

        let failed = run_guarded::<()>(|| Err(HandlerError::failed("nope")));
        assert_eq!(failed, Err(HandlerError::Failed("nope".to_string())));

        let panicked = run_guarded::<()>(|| panic!("boom"));
        assert_eq!(panicked, Err(HandlerError::Panicked("boom".to_string())));
    }
}
