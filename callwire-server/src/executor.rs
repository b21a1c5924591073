//! Command execution.

use crate::error::CommandError;
use crate::registry::Registry;
use serde_json::Value;
use std::sync::Arc;

/// Resolves commands by name and invokes them with positional arguments.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<Registry>,
}

impl Executor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Calls `name` with `args`.
    ///
    /// Fails with [`CommandError::NotFound`] for unknown names and with
    /// [`CommandError::Arity`] when the argument count does not fit the
    /// command's signature. Handler errors are returned unchanged.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, CommandError> {
        let command = self
            .registry
            .lookup(name)
            .ok_or_else(|| CommandError::NotFound(name.to_string()))?;

        let signature = command.signature();
        if !signature.accepts(args.len()) {
            return Err(signature.arity_error(name, args.len()));
        }

        tracing::debug!("Executing {}({:?})", name, args);
        command.invoke(args)
    }
}
