//! # callwire-server
//!
//! TCP server for callwire.
//!
//! This crate provides:
//! - A synchronized command registry with plugin loading
//! - Command execution by name with positional arguments
//! - One task per connection, one response per request
//! - Cooperative shutdown that drains open connections

pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod registry;
pub mod server;

pub use config::{Config, ConfigError, LogLevel, LoggingConfig, NetworkConfig};
pub use connection::Connection;
pub use error::{CommandError, ServerError};
pub use executor::Executor;
pub use registry::{Command, FnCommand, Plugin, PluginCatalog, Registry, Signature};
pub use server::{Server, ServerConfig, ServerState, ServerStats, ShutdownHandle};
