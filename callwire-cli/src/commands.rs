//! Invocation parsing and command execution.

use callwire_client::Client;
use callwire_protocol::Response;
use colored::Colorize;
use serde_json::Value;
use std::fmt;

/// A parsed `method(arg, ...)` line.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub method: String,
    pub params: Vec<Value>,
}

/// Why an input line could not be turned into an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum SyntaxError {
    MissingParens,
    InvalidMethod(String),
    InvalidArguments(String),
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxError::MissingParens => write!(f, "expected method(arg, ...)"),
            SyntaxError::InvalidMethod(name) => write!(f, "invalid method name: {:?}", name),
            SyntaxError::InvalidArguments(e) => write!(f, "invalid arguments: {}", e),
        }
    }
}

impl std::error::Error for SyntaxError {}

fn is_method_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

/// Parses `method(arg, ...)`, where each argument is a JSON literal.
pub fn parse_invocation(line: &str) -> Result<Invocation, SyntaxError> {
    let line = line.trim();
    let open = line.find('(').ok_or(SyntaxError::MissingParens)?;
    if !line.ends_with(')') {
        return Err(SyntaxError::MissingParens);
    }

    let method = line[..open].trim();
    if !is_method_name(method) {
        return Err(SyntaxError::InvalidMethod(method.to_string()));
    }

    let inner = &line[open + 1..line.len() - 1];
    let params = match serde_json::from_str::<Value>(&format!("[{}]", inner)) {
        Ok(Value::Array(params)) => params,
        Ok(other) => return Err(SyntaxError::InvalidArguments(other.to_string())),
        Err(e) => return Err(SyntaxError::InvalidArguments(e.to_string())),
    };

    Ok(Invocation {
        method: method.to_string(),
        params,
    })
}

/// Converts one-shot command-line arguments to JSON values.
///
/// Arguments that are not valid JSON are passed as strings, so
/// `call echo hello` works without quoting.
pub fn parse_args(args: &[String]) -> Vec<Value> {
    args.iter()
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
        .collect()
}

/// Executes an invocation and returns the formatted output.
pub async fn execute(
    client: &mut Client,
    invocation: Invocation,
) -> Result<String, Box<dyn std::error::Error>> {
    let response = client
        .call(&invocation.method, Value::Array(invocation.params))
        .await?;
    Ok(format_response(&response))
}

/// Renders a response for the terminal.
pub fn format_response(response: &Response) -> String {
    match response.error {
        Some(ref error) => format!("{}: {}", "Error".red(), error),
        None => match response.result {
            Value::Null => "OK".green().to_string(),
            Value::String(ref text) => text.trim_end().to_string(),
            ref other => format_json(other),
        },
    }
}

fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
