//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - The first existing file of `herald.toml`, `/etc/herald/herald.toml`,
//!   `~/.config/herald/herald.toml` (or an explicit path)
//! - Environment variables `HERALD_*`, with `__` between nested keys
//!   (`HERALD_PRESENCE__TTL_SECS=60`)

use anyhow::{bail, Context, Result};
use herald_protocol::BusCodec;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Files searched by [`Config::load`], in order.
const CONFIG_PATHS: [&str; 3] = [
    "herald.toml",
    "/etc/herald/herald.toml",
    "~/.config/herald/herald.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Presence liveness.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Shared bus and stores.
    #[serde(default)]
    pub bus: BusConfig,

    /// Pending notifications.
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Outbound frames buffered per connection before writes are dropped.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Presence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Seconds without a heartbeat before an identity goes offline.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Seconds between liveness sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Which implementation backs the bus and stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// In-process; single node only.
    #[default]
    Memory,
    /// Redis pub/sub and data structures.
    Redis,
}

/// Bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: BusBackend,

    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Payload codec.
    #[serde(default)]
    pub codec: BusCodec,

    /// Per-channel buffer of the in-memory bus.
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

/// Notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Pending notifications kept per identity.
    #[serde(default = "default_retain")]
    pub retain: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_send_buffer() -> usize {
    256
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_ttl_secs() -> u64 {
    herald_core::DEFAULT_PRESENCE_TTL.as_secs()
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_bus_capacity() -> usize {
    herald_core::DEFAULT_BUS_CAPACITY
}

fn default_retain() -> usize {
    herald_core::DEFAULT_RETAIN
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            presence: PresenceConfig::default(),
            bus: BusConfig::default(),
            notifications: NotificationsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            send_buffer: default_send_buffer(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::default(),
            redis_url: default_redis_url(),
            codec: BusCodec::default(),
            capacity: default_bus_capacity(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            retain: default_retain(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl PresenceConfig {
    /// Presence time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Interval between sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Config {
    /// Load configuration from the first default path that exists, then the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is invalid.
    pub fn load() -> Result<Self> {
        let path = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        Self::load_from(path.as_deref())
    }

    /// Load configuration from `path` (if any), then the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is invalid.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            let expanded = shellexpand::tilde(path).into_owned();
            info!(path = %expanded, "Loading config file");
            builder = builder.add_source(config::File::new(&expanded, config::FileFormat::Toml));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("HERALD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed or the result is invalid.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.presence.ttl_secs == 0 {
            bail!("presence.ttl_secs must be greater than zero");
        }
        if self.presence.sweep_interval_secs == 0 {
            bail!("presence.sweep_interval_secs must be greater than zero");
        }
        if self.presence.sweep_interval_secs > self.presence.ttl_secs {
            bail!(
                "presence.sweep_interval_secs ({}) must not exceed presence.ttl_secs ({})",
                self.presence.sweep_interval_secs,
                self.presence.ttl_secs
            );
        }
        if self.limits.send_buffer == 0 {
            bail!("limits.send_buffer must be greater than zero");
        }
        if self.limits.max_connections == 0 {
            bail!("limits.max_connections must be greater than zero");
        }
        if self.bus.capacity == 0 {
            bail!("bus.capacity must be greater than zero");
        }
        if self.notifications.retain == 0 {
            bail!("notifications.retain must be greater than zero");
        }
        if self.bus.backend == BusBackend::Redis && self.bus.redis_url.is_empty() {
            bail!("bus.redis_url is required with the redis backend");
        }
        if !self.transport.websocket_path.starts_with('/') {
            bail!("transport.websocket_path must start with '/'");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.presence.ttl_secs, 30);
        assert_eq!(config.presence.sweep_interval_secs, 10);
        assert_eq!(config.bus.backend, BusBackend::Memory);
        assert_eq!(config.bus.codec, BusCodec::Json);
        assert_eq!(config.notifications.retain, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config = Config::from_toml(
            r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_connections = 50000

            [presence]
            ttl_secs = 60
            sweep_interval_secs = 20

            [bus]
            backend = "redis"
            redis_url = "redis://cache:6379"
            codec = "msgpack"
        "#,
        )
        .unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 50000);
        assert_eq!(config.limits.send_buffer, 256);
        assert_eq!(config.presence.ttl(), Duration::from_secs(60));
        assert_eq!(config.bus.backend, BusBackend::Redis);
        assert_eq!(config.bus.codec, BusCodec::Msgpack);
    }

    #[test]
    fn test_sweep_interval_must_not_exceed_ttl() {
        let result = Config::from_toml(
            r#"
            [presence]
            ttl_secs = 10
            sweep_interval_secs = 30
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        for toml in [
            "[presence]\nttl_secs = 0\nsweep_interval_secs = 0",
            "[limits]\nsend_buffer = 0",
            "[bus]\ncapacity = 0",
            "[notifications]\nretain = 0",
        ] {
            assert!(Config::from_toml(toml).is_err(), "accepted: {toml}");
        }
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = Config::load_from(None).unwrap();
        assert_eq!(config.transport.websocket_path, "/ws");
    }
}
