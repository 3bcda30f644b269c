//! RON configuration for the client

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Root client configuration
///
/// ```ron
/// (
///     url: "wss://example.com/sync",
///     token: "secret",
///     observer: false,
///     connect_timeout_ms: 5000,
///     backoff: (initial_ms: 250, max_ms: 8000),
/// )
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Server endpoint (`ws://` or `wss://`)
    pub url: String,
    /// Auth token sent in the connect announcement
    #[serde(default)]
    pub token: String,
    /// Receive only; never own a writable slot
    #[serde(default)]
    pub observer: bool,
    /// Keep the handshake alive but do not materialize payloads
    #[serde(default)]
    pub ignore_data: bool,
    /// Upper bound for one connection attempt
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Reconnect delays
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_connect_timeout() -> u64 {
    10_000
}

/// Reconnect delay parameters
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BackoffConfig {
    /// First delay after a failure
    #[serde(default = "default_initial")]
    pub initial_ms: u64,
    /// Cap for any single delay
    #[serde(default = "default_max")]
    pub max_ms: u64,
    /// Lower bound of the per-retry growth factor
    #[serde(default = "default_min_factor")]
    pub min_factor: f64,
    /// Upper bound of the per-retry growth factor
    #[serde(default = "default_max_factor")]
    pub max_factor: f64,
}

fn default_initial() -> u64 {
    500
}

fn default_max() -> u64 {
    10_000
}

fn default_min_factor() -> f64 {
    1.5
}

fn default_max_factor() -> f64 {
    2.5
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_initial(),
            max_ms: default_max(),
            min_factor: default_min_factor(),
            max_factor: default_max_factor(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the endpoint
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            observer: false,
            ignore_data: false,
            connect_timeout_ms: default_connect_timeout(),
            backoff: BackoffConfig::default(),
        }
    }

    /// Parse and validate a RON document
    pub fn from_ron_str(content: &str) -> Result<Self> {
        let config: ClientConfig = ron::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_ron_str(&content)
    }

    /// Check the endpoint and the timing parameters
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)
            .map_err(|e| Error::InvalidConfig(format!("url {:?}: {}", self.url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::InvalidConfig(format!(
                "url scheme must be ws or wss, got {}",
                url.scheme()
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }

        let backoff = &self.backoff;
        if backoff.initial_ms == 0 || backoff.initial_ms > backoff.max_ms {
            return Err(Error::InvalidConfig(format!(
                "backoff needs 0 < initial_ms <= max_ms, got {} and {}",
                backoff.initial_ms, backoff.max_ms
            )));
        }
        if !(1.0 <= backoff.min_factor && backoff.min_factor <= backoff.max_factor) {
            return Err(Error::InvalidConfig(format!(
                "backoff needs 1.0 <= min_factor <= max_factor, got {} and {}",
                backoff.min_factor, backoff.max_factor
            )));
        }
        Ok(())
    }

    /// Connection attempt timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
