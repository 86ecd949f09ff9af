use std::collections::BTreeMap;

use tailrpc_core::{is_reserved, Value};

use crate::context::CallContext;
use crate::error::EngineError;
use crate::handler::HandlerError;

/// Locally callable function. The returned value is sent back as the single
/// argument of the automatic `#cb` reply.
pub type FunctionHandler =
    Box<dyn FnMut(&mut CallContext<'_>, &[Value]) -> Result<Value, HandlerError> + Send>;

/// Boxes a closure as a [`FunctionHandler`].
pub fn function<F>(f: F) -> FunctionHandler
where
    F: FnMut(&mut CallContext<'_>, &[Value]) -> Result<Value, HandlerError> + Send + 'static,
{
    Box::new(f)
}

/// Functions this node answers to, addressed by exact name.
#[derive(Default)]
pub struct ExposedRegistry {
    functions: BTreeMap<String, FunctionHandler>,
}

impl ExposedRegistry {
    /// Adds or replaces `name`.
    pub fn expose(&mut self, name: impl Into<String>, handler: FunctionHandler) -> Result<(), EngineError> {
        let name = name.into();
        check_name(&name)?;
        self.functions.insert(name, handler);
        Ok(())
    }

    /// Removes `name`; returns whether it was exposed.
    pub fn conceal(&mut self, name: &str) -> bool {
        self.functions.remove(name).is_some()
    }

    /// Replaces the whole registry. Nothing changes if any name is invalid.
    pub fn replace_all(
        &mut self,
        functions: impl IntoIterator<Item = (String, FunctionHandler)>,
    ) -> Result<(), EngineError> {
        let mut next = BTreeMap::new();
        for (name, handler) in functions {
            check_name(&name)?;
            next.insert(name, handler);
        }
        self.functions = next;
        Ok(())
    }

    /// Exposed names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut FunctionHandler> {
        self.functions.get_mut(name)
    }
}

fn check_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::InvalidFunctionName {
            name: name.to_string(),
            reason: "name must not be empty",
        });
    }
    if is_reserved(name) {
        return Err(EngineError::InvalidFunctionName {
            name: name.to_string(),
            reason: "names starting with '#' are reserved",
        });
    }
    Ok(())
}
