//! Client and server configuration
//!
//! Every field has a default, so a config file only needs to list what it
//! overrides:
//!
//! ```json
//! { "client": { "lifetime": 300 }, "server": { "port": 15683 } }
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Device-side settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Port of the device's own listener
    pub port: u16,
    /// Registration lifetime in seconds
    pub lifetime: u32,
    /// LWM2M protocol version sent on registration
    pub version: String,
    /// Binding mode sent on registration
    pub binding: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: 5684,
            lifetime: 85671,
            version: "1.0".to_string(),
            binding: "U".to_string(),
        }
    }
}

/// Management-side settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the server listens on
    pub port: u16,
    /// Lifetime assumed when a device registers without `lt`
    pub default_lifetime: u32,
    /// How long the UDP transport waits for a response
    pub timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5683,
            default_lifetime: 86400,
            timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Load a config from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a config from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.client.lifetime, 85671);
        assert_eq!(config.client.version, "1.0");
        assert_eq!(config.client.binding, "U");
        assert_eq!(config.server.port, 5683);
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_json(r#"{"client": {"lifetime": 300}}"#).unwrap();
        assert_eq!(config.client.lifetime, 300);
        assert_eq!(config.client.binding, "U");
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"server": {"port": 15683, "timeout_ms": 250}}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.port, 15683);
        assert_eq!(config.server.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_json() {
        assert!(Config::from_json("{not json").is_err());
    }
}
