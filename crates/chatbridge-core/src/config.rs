//! Configuration resolution for chatbridge.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/chatbridge/settings.json`)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by each binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete chatbridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub client: ClientConfig,
    pub producer: ProducerConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            client: ClientConfig::default(),
            producer: ProducerConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Relay hub configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Capacity of each connection's outbound queue. A full queue drops
    /// messages for that connection only.
    pub outbound_queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            outbound_queue_capacity: 256,
        }
    }
}

impl RelayConfig {
    /// `host:port` the relay listens on.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings shared by everything that dials the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL of the relay.
    pub url: String,
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

/// Producer runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub reconnect_delay_ms: u64,
    /// Upper bound for the reconnect delay. Equal to `reconnect_delay_ms`
    /// for a fixed backoff.
    pub reconnect_max_delay_ms: u64,
    /// Seconds a query may go without any notification before the producer
    /// reports an error.
    pub stall_timeout_secs: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3000,
            reconnect_max_delay_ms: 3000,
            stall_timeout_secs: 60,
        }
    }
}

/// Load configuration from the global config file and the environment.
pub fn load_config() -> Result<Config> {
    let mut config = match global_config_path() {
        Some(path) => load_config_from(&path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chatbridge").join("settings.json"))
}

/// Apply `CHATBRIDGE_*` overrides. `lookup` resolves a variable name.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("CHATBRIDGE_HOST") {
        config.relay.host = val;
    }
    if let Some(n) = lookup("CHATBRIDGE_PORT").and_then(|v| v.parse().ok()) {
        config.relay.port = n;
    }
    if let Some(n) = lookup("CHATBRIDGE_QUEUE_CAPACITY").and_then(|v| v.parse().ok()) {
        config.relay.outbound_queue_capacity = n;
    }
    if let Some(val) = lookup("CHATBRIDGE_URL") {
        config.client.url = val;
    }
    if let Some(val) = lookup("CHATBRIDGE_LOG_LEVEL") {
        config.log_level = val;
    }
}
