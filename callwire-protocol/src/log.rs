//! Log verbosity shared by the server and the command-line tools.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Log verbosity, from least to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Assert,
    Error,
    Warning,
    #[default]
    Message,
    Debug,
}

impl LogLevel {
    /// Returns the `tracing` filter directive for this level.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Assert | LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Message => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Assert => "assert",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Message => "message",
            LogLevel::Debug => "debug",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "assert" => Ok(LogLevel::Assert),
            "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "message" | "info" => Ok(LogLevel::Message),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}
