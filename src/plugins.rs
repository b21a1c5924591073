//! Command bundles shipped with the server binary.
//!
//! `core` is loaded at startup; `clock` is only offered through `import`.

use callwire_server::{Command, CommandError, FnCommand, Plugin, PluginCatalog, Signature};
use serde_json::{Number, Value};
use std::sync::Arc;

/// Basic commands every deployment gets.
pub struct CorePlugin;

impl Plugin for CorePlugin {
    fn name(&self) -> &str {
        "core"
    }

    fn commands(&self) -> Vec<Arc<dyn Command>> {
        vec![
            Arc::new(FnCommand::new(
                "echo",
                Signature::new().param("value"),
                |args| Ok(args.first().cloned().unwrap_or_default()),
            )),
            Arc::new(FnCommand::new("ping", Signature::new(), |_| {
                Ok(Value::String("pong".to_string()))
            })),
            Arc::new(FnCommand::new(
                "add",
                Signature::new().param("a").param("b"),
                |args| match args {
                    [a, b] => add(a, b),
                    _ => Err(CommandError::InvalidArgument("add() expects two numbers".into())),
                },
            )),
            Arc::new(FnCommand::new(
                "concat",
                Signature::new().variadic("parts"),
                concat,
            )),
        ]
    }
}

/// Wall-clock queries.
pub struct ClockPlugin;

impl Plugin for ClockPlugin {
    fn name(&self) -> &str {
        "clock"
    }

    fn commands(&self) -> Vec<Arc<dyn Command>> {
        vec![
            Arc::new(FnCommand::new("now", Signature::new(), |_| {
                Ok(Value::String(chrono::Utc::now().to_rfc3339()))
            })),
            Arc::new(FnCommand::new("unix_time", Signature::new(), |_| {
                Ok(Value::from(chrono::Utc::now().timestamp()))
            })),
        ]
    }
}

/// Every plugin the `import` command may load.
pub fn catalog() -> PluginCatalog {
    PluginCatalog::new()
        .with_plugin(Arc::new(CorePlugin))
        .with_plugin(Arc::new(ClockPlugin))
}

fn add(a: &Value, b: &Value) -> Result<Value, CommandError> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(Value::from(sum));
        }
    }

    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Number::from_f64(x + y)
            .map(Value::Number)
            .ok_or_else(|| CommandError::InvalidArgument("result is not a finite number".into())),
        _ => Err(CommandError::InvalidArgument(format!(
            "add() expects two numbers, got {} and {}",
            a, b
        ))),
    }
}

fn concat(parts: &[Value]) -> Result<Value, CommandError> {
    let mut out = String::new();
    for part in parts {
        match part {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
    }
    Ok(Value::String(out))
}
