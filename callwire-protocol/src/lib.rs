//! # callwire-protocol
//!
//! Wire protocol implementation for callwire.
//!
//! This crate provides:
//! - Request/Response envelope types
//! - Request validation with stable error strings
//! - Message framing (single-read or newline-delimited)
//! - Protocol constants and the shared log level

pub mod codec;
pub mod error;
pub mod log;
pub mod message;

pub use codec::{encode_message, Framing, MessageDecoder};
pub use error::ProtocolError;
pub use log::LogLevel;
pub use message::{InvalidRequest, Request, Response};

/// Default port for callwire server.
pub const DEFAULT_PORT: u16 = 8338;

/// Default capacity of a single socket read (4 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 4096;
