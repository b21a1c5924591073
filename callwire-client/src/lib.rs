//! # callwire-client
//!
//! Client library for callwire.
//!
//! This crate provides:
//! - Async TCP client with idempotent connect/disconnect
//! - Request id generation and response correlation
//! - Optional receive timeout

pub mod client;
pub mod connection;
pub mod error;

pub use client::Client;
pub use connection::{ClientConfig, Connection};
pub use error::ClientError;
