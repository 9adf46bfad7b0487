//! Gateway configuration
//!
//! Loaded from a TOML file; every field has a default so an empty file (or no
//! file at all) yields a working gateway.

use agv_shared::protocol;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Protocol identifiers and markers used by the telegram matcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Device ids that are dispatch/control channels, not vehicles
    pub control_devices: Vec<String>,
    /// Control device whose reports are always accepted
    pub unchecked_device: Option<String>,
    pub arrival_cmd_key: String,
    pub pre_stop_success_cmd_key: String,
    pub stop_action_marker: String,
    pub pre_stop_success_marker: String,
    /// Point accepted even when it is not the expected waypoint
    pub bypass_point: Option<String>,
    /// Record dispatched telegrams in the handshake tracker
    pub handshake_listener: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            control_devices: protocol::DEFAULT_CONTROL_DEVICES
                .iter()
                .map(|id| id.to_string())
                .collect(),
            unchecked_device: Some(protocol::DEFAULT_UNCHECKED_DEVICE.into()),
            arrival_cmd_key: protocol::DEFAULT_ARRIVAL_CMD_KEY.into(),
            pre_stop_success_cmd_key: protocol::DEFAULT_PRE_STOP_SUCCESS_CMD_KEY.into(),
            stop_action_marker: protocol::DEFAULT_STOP_ACTION_MARKER.into(),
            pre_stop_success_marker: protocol::DEFAULT_PRE_STOP_SUCCESS_MARKER.into(),
            bypass_point: Some(protocol::DEFAULT_BYPASS_POINT.into()),
            handshake_listener: false,
        }
    }
}

impl MatcherConfig {
    /// Check if a device id is a control channel
    pub fn is_control_device(&self, device_id: &str) -> bool {
        self.control_devices.iter().any(|id| id == device_id)
    }

    /// Check if reports from this device skip waypoint tracking
    pub fn is_unchecked_device(&self, device_id: &str) -> bool {
        self.unchecked_device.as_deref() == Some(device_id)
    }

    pub fn is_bypass_point(&self, point: &str) -> bool {
        self.bypass_point.as_deref() == Some(point)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control_devices.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid("Empty control device id".into()));
        }
        if self.arrival_cmd_key.is_empty() || self.pre_stop_success_cmd_key.is_empty() {
            return Err(ConfigError::Invalid("Command keys must not be empty".into()));
        }
        if self.arrival_cmd_key == self.pre_stop_success_cmd_key {
            return Err(ConfigError::Invalid(format!(
                "Arrival and pre-stop success share command key '{}'",
                self.arrival_cmd_key
            )));
        }
        if self.stop_action_marker.is_empty() || self.pre_stop_success_marker.is_empty() {
            return Err(ConfigError::Invalid("Markers must not be empty".into()));
        }
        Ok(())
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// UDP address for vehicle traffic
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// UDP address where upstream dispatch submits telegrams
    #[serde(default)]
    pub dispatch_bind: Option<SocketAddr>,

    /// Fallback destination for devices with no known address
    #[serde(default)]
    pub broadcast: Option<SocketAddr>,

    /// Static device id -> address table
    #[serde(default)]
    pub devices: BTreeMap<String, SocketAddr>,

    /// Route monitor period in seconds (0 disables the monitor)
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Most unacknowledged handshake entries kept before the oldest is dropped
    #[serde(default = "default_handshake_capacity")]
    pub handshake_capacity: usize,

    #[serde(default)]
    pub matcher: MatcherConfig,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 60000))
}

fn default_monitor_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_handshake_capacity() -> usize {
    1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            dispatch_bind: None,
            broadcast: None,
            devices: BTreeMap::new(),
            monitor_interval_secs: default_monitor_interval(),
            log_level: default_log_level(),
            handshake_capacity: default_handshake_capacity(),
            matcher: MatcherConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch_bind == Some(self.bind) {
            return Err(ConfigError::Invalid(
                "dispatch_bind must differ from bind".into(),
            ));
        }
        if self.handshake_capacity == 0 {
            return Err(ConfigError::Invalid("handshake_capacity must be positive".into()));
        }
        if self.devices.keys().any(String::is_empty) {
            return Err(ConfigError::Invalid("Empty device id in devices table".into()));
        }
        self.matcher.validate()
    }

    /// Route monitor period, if the monitor is enabled
    pub fn monitor_interval(&self) -> Option<Duration> {
        (self.monitor_interval_secs > 0).then(|| Duration::from_secs(self.monitor_interval_secs))
    }
}
