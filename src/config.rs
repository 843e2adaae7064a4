//! Configuration types for reqbin

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broker::{IngestPolicy, DEFAULT_QUEUE_CAPACITY};
use crate::event::DEFAULT_DISPLAY_BODY_CHARS;
use crate::key::{DEFAULT_KEY_LENGTH, KEY_ALPHABET};
use crate::registry::DEFAULT_MAX_ATTEMPTS;
use crate::{ReqbinError, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Ingestion queue and mailbox settings
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Bin key settings
    #[serde(default)]
    pub keys: KeyConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub host: IpAddr,
    /// Port to bind
    pub port: u16,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Seconds between keep-alive comments on idle event streams
    pub keepalive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8000,
            max_connections: 4096,
            keepalive_secs: 15,
        }
    }
}

impl ServerConfig {
    /// Socket address to bind
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Keep-alive interval
    #[must_use]
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum accepted request body in bytes
    pub max_body_size: usize,
    /// Maximum body characters shown to observers
    pub display_body_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 3_000_000,
            display_body_chars: DEFAULT_DISPLAY_BODY_CHARS,
        }
    }
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Ingestion queue capacity
    pub queue_capacity: usize,
    /// Per-subscriber mailbox capacity
    pub mailbox_capacity: usize,
    /// Behaviour when the ingestion queue is full
    pub ingest_policy: IngestPolicy,
    /// How long `wait` blocks before giving up, in milliseconds
    pub ingest_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            mailbox_capacity: 64,
            ingest_policy: IngestPolicy::Wait,
            ingest_timeout_ms: 500,
        }
    }
}

impl BrokerConfig {
    /// Wait timeout for the `wait` policy
    #[must_use]
    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_timeout_ms)
    }
}

/// Key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Symbols per key
    pub length: usize,
    /// Draws before bin creation gives up on collisions
    pub max_attempts: usize,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            length: DEFAULT_KEY_LENGTH,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReqbinError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ReqbinError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("server.max_connections", self.server.max_connections),
            ("limits.max_body_size", self.limits.max_body_size),
            ("broker.queue_capacity", self.broker.queue_capacity),
            ("broker.mailbox_capacity", self.broker.mailbox_capacity),
            ("keys.length", self.keys.length),
            ("keys.max_attempts", self.keys.max_attempts),
        ];

        for (name, value) in nonzero {
            if value == 0 {
                return Err(ReqbinError::ConfigError(format!("{name} must be > 0")));
            }
        }

        if self.server.keepalive_secs == 0 {
            return Err(ReqbinError::ConfigError(
                "server.keepalive_secs must be > 0".to_string(),
            ));
        }

        if self.broker.ingest_policy == IngestPolicy::Wait && self.broker.ingest_timeout_ms == 0 {
            return Err(ReqbinError::ConfigError(
                "broker.ingest_timeout_ms must be > 0 with the wait policy; use reject to fail fast"
                    .to_string(),
            ));
        }

        // Fewer than ~2^40 keys makes collisions likely for a busy instance
        let keyspace_bits = (KEY_ALPHABET.len() as f64).log2() * self.keys.length as f64;
        if keyspace_bits < 40.0 {
            tracing::warn!(
                length = self.keys.length,
                "Short bin keys: collisions will force creation retries"
            );
        }

        Ok(())
    }
}
