//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding or validating a message.
///
/// The display strings are sent verbatim in the `error` field of a response,
/// so they are part of the wire contract.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("'{0}' is required")]
    MissingField(&'static str),

    #[error("'{field}' must be {expected}")]
    InvalidType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("request must be a JSON object")]
    NotAnObject,

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
