//! Configuration loading and validation for redundancy devices

use crate::supervision::SupervisionTiming;
use crate::types::{DEFAULT_PRUNE_PERIOD, ProtocolVersion, SupervisionVlan};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl From<ConfigError> for common::Error {
    fn from(err: ConfigError) -> Self {
        common::Error::config(err)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub supervision: SupervisionSettings,

    #[serde(default)]
    pub node_table: NodeTableSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.device.validate()?;
        self.supervision.validate()?;
        self.node_table.validate()?;
        Ok(())
    }
}

/// Device identity and slave links
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_distinct_slaves"))]
pub struct DeviceSettings {
    #[validate(length(min = 1, max = 15))]
    pub name: String,

    pub protocol: ProtocolVersion,

    #[validate(length(min = 1, max = 15))]
    pub slave_a: String,

    #[validate(length(min = 1, max = 15))]
    pub slave_b: String,

    /// Last octet of the supervision multicast address
    pub multicast_suffix: u8,
}

/// Supervision frame settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SupervisionSettings {
    pub enabled: bool,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_announce_interval")]
    pub announce_interval: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_life_check_interval")]
    pub life_check_interval: Duration,

    #[validate]
    pub vlan: Option<VlanSettings>,
}

/// 802.1Q tagging of supervision frames
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct VlanSettings {
    #[validate(range(min = 1, max = 4094))]
    pub vid: u16,

    #[serde(default)]
    #[validate(range(max = 7))]
    pub pcp: u8,

    #[serde(default)]
    pub dei: bool,
}

/// Node table settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NodeTableSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_prune_period")]
    pub prune_period: Duration,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

// Default implementations

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            name: "hsr0".to_string(),
            protocol: ProtocolVersion::HsrV1,
            slave_a: "eth1".to_string(),
            slave_b: "eth2".to_string(),
            multicast_suffix: 0,
        }
    }
}

impl Default for SupervisionSettings {
    fn default() -> Self {
        let timing = SupervisionTiming::default();
        Self {
            enabled: true,
            announce_interval: timing.announce_interval,
            life_check_interval: timing.life_check_interval,
            vlan: None,
        }
    }
}

impl Default for NodeTableSettings {
    fn default() -> Self {
        Self {
            prune_period: DEFAULT_PRUNE_PERIOD,
        }
    }
}

// Custom validators

fn validate_distinct_slaves(device: &DeviceSettings) -> Result<(), ValidationError> {
    if device.slave_a == device.slave_b {
        return Err(ValidationError::new("slaves_not_distinct"));
    }
    Ok(())
}

fn validate_announce_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if !(1..=10_000).contains(&millis) {
        return Err(ValidationError::new("announce_interval_out_of_range"));
    }
    Ok(())
}

fn validate_life_check_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if !(10..=60_000).contains(&millis) {
        return Err(ValidationError::new("life_check_interval_out_of_range"));
    }
    Ok(())
}

fn validate_prune_period(period: &Duration) -> Result<(), ValidationError> {
    let millis = period.as_millis();
    if !(100..=600_000).contains(&millis) {
        return Err(ValidationError::new("prune_period_out_of_range"));
    }
    Ok(())
}

/// Supervision parameters of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisionOptions {
    /// When false, supervision cycles run but never build a frame.
    pub enabled: bool,
    pub timing: SupervisionTiming,
    pub vlan: Option<SupervisionVlan>,
}

impl Default for SupervisionOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            timing: SupervisionTiming::default(),
            vlan: None,
        }
    }
}

/// Parameters consumed when a device is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    pub protocol: ProtocolVersion,
    pub multicast_suffix: u8,
    pub supervision: SupervisionOptions,
    pub prune_period: Duration,
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>, protocol: ProtocolVersion) -> Self {
        Self {
            name: name.into(),
            protocol,
            multicast_suffix: 0,
            supervision: SupervisionOptions::default(),
            prune_period: DEFAULT_PRUNE_PERIOD,
        }
    }

    pub fn with_multicast_suffix(mut self, suffix: u8) -> Self {
        self.multicast_suffix = suffix;
        self
    }

    pub fn with_supervision_vlan(mut self, vlan: SupervisionVlan) -> Self {
        self.supervision.vlan = Some(vlan);
        self
    }

    pub fn with_supervision_timing(mut self, timing: SupervisionTiming) -> Self {
        self.supervision.timing = timing;
        self
    }

    pub fn with_supervision_enabled(mut self, enabled: bool) -> Self {
        self.supervision.enabled = enabled;
        self
    }

    pub fn with_prune_period(mut self, period: Duration) -> Self {
        self.prune_period = period;
        self
    }
}

// Configuration loading implementation

impl Config {
    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        tracing::info!(path = %path.as_ref().display(), "Loading configuration");
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to the parameters used for device creation
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            name: self.device.name.clone(),
            protocol: self.device.protocol,
            multicast_suffix: self.device.multicast_suffix,
            supervision: SupervisionOptions {
                enabled: self.supervision.enabled,
                timing: SupervisionTiming {
                    announce_interval: self.supervision.announce_interval,
                    life_check_interval: self.supervision.life_check_interval,
                },
                vlan: self.supervision.vlan.map(|v| SupervisionVlan {
                    vid: v.vid,
                    pcp: v.pcp,
                    dei: v.dei,
                }),
            },
            prune_period: self.node_table.prune_period,
        }
    }

    /// Install the tracing subscriber described by the logging section
    pub fn init_logging(&self) {
        let json = self.logging.format.as_deref() == Some("json");
        common::logging::init_with_level(self.logging.level.as_deref(), json);
    }
}
