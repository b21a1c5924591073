//! JSON message types for callwire requests and responses.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Client-chosen correlation id, echoed back in the response.
    pub id: Value,

    /// Name of the command to invoke.
    pub method: String,

    /// Positional arguments.
    pub params: Vec<Value>,
}

/// A request that failed validation.
///
/// Carries the id when it had already been extracted, so the response can
/// still be correlated by the peer.
#[derive(Debug)]
pub struct InvalidRequest {
    pub id: Option<Value>,
    pub error: ProtocolError,
}

impl InvalidRequest {
    fn anonymous(error: impl Into<ProtocolError>) -> Self {
        Self {
            id: None,
            error: error.into(),
        }
    }

    fn with_id(id: &Value, error: ProtocolError) -> Self {
        Self {
            id: Some(id.clone()),
            error,
        }
    }
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    /// Parses and validates a raw message.
    ///
    /// Checks run in a fixed order: `id` present, `method` present, `method`
    /// is a string, `params` present, `params` is an array.
    pub fn parse(payload: &[u8]) -> Result<Self, InvalidRequest> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| InvalidRequest::anonymous(ProtocolError::InvalidUtf8))?;
        let value: Value = serde_json::from_str(text).map_err(InvalidRequest::anonymous)?;
        Self::from_value(value)
    }

    /// Validates an already decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, InvalidRequest> {
        let mut object = match value {
            Value::Object(object) => object,
            _ => return Err(InvalidRequest::anonymous(ProtocolError::NotAnObject)),
        };

        let id = object
            .remove("id")
            .ok_or_else(|| InvalidRequest::anonymous(ProtocolError::MissingField("id")))?;

        let method = match object.remove("method") {
            Some(Value::String(method)) => method,
            Some(_) => {
                return Err(InvalidRequest::with_id(
                    &id,
                    ProtocolError::InvalidType {
                        field: "method",
                        expected: "a string",
                    },
                ))
            }
            None => {
                return Err(InvalidRequest::with_id(
                    &id,
                    ProtocolError::MissingField("method"),
                ))
            }
        };

        let params = match object.remove("params") {
            Some(Value::Array(params)) => params,
            Some(_) => {
                return Err(InvalidRequest::with_id(
                    &id,
                    ProtocolError::InvalidType {
                        field: "params",
                        expected: "an array",
                    },
                ))
            }
            None => {
                return Err(InvalidRequest::with_id(
                    &id,
                    ProtocolError::MissingField("params"),
                ))
            }
        };

        Ok(Self { id, method, params })
    }
}

/// Response message envelope.
///
/// All three fields are always serialized; unused ones are `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this response correlates to, or null when the
    /// request was unreadable.
    #[serde(default)]
    pub id: Value,

    /// Result payload (null for error responses).
    #[serde(default)]
    pub result: Value,

    /// Human-readable error message.
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn error(id: Value, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(message.into()),
        }
    }

    /// Decodes a response from raw bytes.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)?;
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(ProtocolError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl From<InvalidRequest> for Response {
    fn from(invalid: InvalidRequest) -> Self {
        Response::error(invalid.id.unwrap_or(Value::Null), invalid.error.to_string())
    }
}
