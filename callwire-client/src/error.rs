//! Client error types.

use serde_json::Value;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] callwire_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("response id mismatch: expected {expected}, got {got}")]
    IdMismatch { expected: u64, got: Value },

    #[error("server error: {0}")]
    Remote(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    ///
    /// Retryable errors are transport failures; after one of them the client
    /// is disconnected and may connect again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed
        )
    }
}
