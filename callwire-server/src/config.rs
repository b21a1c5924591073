//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via CALLWIRE_CONFIG or --config)
//! 3. Environment variables

pub use callwire_protocol::LogLevel;

use callwire_protocol::{Framing, DEFAULT_BUFFER_SIZE, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os("CALLWIRE_CONFIG").map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Loads from `path` (or defaults when `None`), then applies environment
    /// variable overrides and validates.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.logging.apply_env_overrides();
    }

    /// Checks values that would make the server unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.read_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "network.read_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.network.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "network.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Accept loop polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Capacity of a single socket read in bytes.
    pub read_buffer_size: usize,
    /// Message framing.
    pub framing: Framing,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            poll_interval_ms: 1000,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            framing: Framing::default(),
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("CALLWIRE_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(interval) = std::env::var("CALLWIRE_POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.poll_interval_ms = ms;
            }
        }

        if let Ok(size) = std::env::var("CALLWIRE_READ_BUFFER_SIZE") {
            if let Ok(n) = size.parse() {
                self.read_buffer_size = n;
            }
        }

        if let Ok(framing) = std::env::var("CALLWIRE_FRAMING") {
            if let Ok(parsed) = framing.parse() {
                self.framing = parsed;
            }
        }
    }

    /// Returns the polling interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Most verbose level that is emitted.
    pub level: LogLevel,
}

impl LoggingConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("CALLWIRE_LOG_LEVEL") {
            if let Ok(parsed) = level.parse() {
                self.level = parsed;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), 8338);
        assert_eq!(config.network.read_buffer_size, 4096);
        assert_eq!(config.network.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.network.framing, Framing::SingleRead);
        assert_eq!(config.logging.level, LogLevel::Message);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.bind_addr, config.network.bind_addr);
        assert_eq!(parsed.network.framing, config.network.framing);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "network:\n  framing: lines\nlogging:\n  level: debug\n";
        let parsed: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.network.framing, Framing::Lines);
        assert_eq!(parsed.network.read_buffer_size, 4096);
        assert_eq!(parsed.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("callwire.yaml");

        let mut config = Config::default();
        config.network.bind_addr = "0.0.0.0:9000".parse().unwrap();
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.network.bind_addr.port(), 9000);
    }

    #[test]
    fn test_load_from_file_validates() {
        let dir = TempDir::new().unwrap();

        let path = dir.path().join("good.yaml");
        std::fs::write(&path, "network:\n  read_buffer_size: 1024\n").unwrap();
        let loaded = Config::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.network.read_buffer_size, 1024);

        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "network:\n  poll_interval_ms: 0\n").unwrap();
        assert!(matches!(
            Config::load_from(Some(&path)),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_load_from_without_file_uses_defaults() {
        let config = Config::load_from(None).unwrap();
        assert_eq!(config.network.poll_interval_ms, 1000);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/callwire.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let mut config = Config::default();
        config.network.read_buffer_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
