//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (`BEACON_HOST`, `BEACON_PORT`)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tenvis_beacon_core::room::validate_room_id;
use tenvis_beacon_core::{IdentityGenerator, LifecycleConfig, RoomConfig, RouterConfig};

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

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Room and identity configuration.
    #[serde(default)]
    pub rooms: RoomsConfig,

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
    /// Maximum number of rooms.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Frames queued per connection before it counts as too slow.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Room and identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Room every connection joins on `init`.
    #[serde(default = "default_room")]
    pub default_room: String,

    /// Number of digits in generated identities.
    #[serde(default = "default_identity_digits")]
    pub identity_digits: u32,
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

// Default value functions
fn default_host() -> String {
    std::env::var("BEACON_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("BEACON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8488)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_rooms() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_room() -> String {
    tenvis_beacon_core::DEFAULT_ROOM.to_string()
}

fn default_identity_digits() -> u32 {
    tenvis_beacon_core::identity::DEFAULT_IDENTITY_DIGITS
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
            heartbeat: HeartbeatConfig::default(),
            rooms: RoomsConfig::default(),
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
            max_rooms: default_max_rooms(),
            max_message_size: default_max_message_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            default_room: default_room(),
            identity_digits: default_identity_digits(),
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

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "beacon.toml",
            "/etc/beacon/beacon.toml",
            "~/.config/beacon/beacon.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, self.port))
    }

    /// Build the router configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `rooms.identity_digits` is out of range or
    /// `rooms.default_room` is not a valid room id.
    pub fn router_config(&self) -> Result<RouterConfig> {
        validate_room_id(&self.rooms.default_room)
            .map_err(|e| anyhow::anyhow!("Invalid rooms.default_room: {}", e))?;
        let identities = IdentityGenerator::new(self.rooms.identity_digits)
            .context("Invalid rooms.identity_digits")?;

        Ok(RouterConfig {
            default_room: self.rooms.default_room.clone(),
            identities,
            rooms: RoomConfig {
                max_rooms: self.limits.max_rooms,
            },
        })
    }

    /// Build the per-connection lifecycle configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a heartbeat period is zero.
    pub fn lifecycle_config(&self) -> Result<LifecycleConfig> {
        if self.heartbeat.interval_ms == 0 {
            anyhow::bail!("heartbeat.interval_ms must be greater than zero");
        }
        if self.heartbeat.timeout_ms == 0 {
            anyhow::bail!("heartbeat.timeout_ms must be greater than zero");
        }

        Ok(LifecycleConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat.timeout_ms),
            outbound_capacity: self.limits.outbound_queue_capacity,
            max_message_size: self.limits.max_message_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.limits.max_rooms, 10_000);
        assert_eq!(config.rooms.default_room, "lobby");
        assert_eq!(config.rooms.identity_digits, 9);
    }

    #[test]
    fn test_config_bind_addr() {
        let mut config = Config::default();
        config.host = "127.0.0.1".to_string();
        config.port = 8488;
        assert_eq!(config.bind_addr().unwrap().port(), 8488);

        config.host = "not a host".to_string();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_rooms = 50

            [heartbeat]
            interval_ms = 1000

            [rooms]
            default_room = "hall"
            identity_digits = 6
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_rooms, 50);
        assert_eq!(config.limits.max_message_size, 64 * 1024);
        assert_eq!(config.heartbeat.interval_ms, 1000);
        assert_eq!(config.heartbeat.timeout_ms, 60_000);

        let router = config.router_config().unwrap();
        assert_eq!(router.default_room, "hall");
        assert_eq!(router.identities.digits(), 6);
        assert_eq!(router.rooms.max_rooms, 50);

        let lifecycle = config.lifecycle_config().unwrap();
        assert_eq!(lifecycle.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(lifecycle.outbound_capacity, 256);
    }

    #[test]
    fn test_invalid_identity_digits() {
        let config: Config = toml::from_str("[rooms]\nidentity_digits = 19").unwrap();
        assert!(config.router_config().is_err());
    }

    #[test]
    fn test_zero_heartbeat_rejected() {
        let config: Config = toml::from_str("[heartbeat]\ninterval_ms = 0").unwrap();
        assert!(config.lifecycle_config().is_err());

        let config: Config = toml::from_str("[heartbeat]\ntimeout_ms = 0").unwrap();
        assert!(config.lifecycle_config().is_err());
    }

    #[test]
    fn test_invalid_default_room_rejected() {
        let long = "x".repeat(1024);
        for room in ["", "tab\there", long.as_str()] {
            let mut config = Config::default();
            config.rooms.default_room = room.to_string();
            let err = config.router_config().unwrap_err();
            assert!(err.to_string().contains("rooms.default_room"));
        }
    }
}
