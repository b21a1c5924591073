//! Server error types.

use crate::server::ServerState;
use std::net::SocketAddr;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] callwire_protocol::ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid server state: expected {expected:?}, found {found:?}")]
    InvalidState {
        expected: ServerState,
        found: ServerState,
    },
}

/// Errors raised while resolving or running a command.
///
/// Every variant ends up as the `error` string of a response.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command {0} not found")]
    NotFound(String),

    #[error("{name}() takes {expected} positional arguments but {given} were given")]
    Arity {
        name: String,
        expected: String,
        given: usize,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("plugin {0} not found")]
    PluginNotFound(String),

    #[error("command {0} panicked")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

impl CommandError {
    /// Shorthand for a free-form handler failure.
    pub fn failed(message: impl Into<String>) -> Self {
        CommandError::Failed(message.into())
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(e: serde_json::Error) -> Self {
        CommandError::InvalidArgument(e.to_string())
    }
}
