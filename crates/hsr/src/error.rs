//! Error types for redundancy device operations.

use crate::registry::DeviceId;
use crate::types::PortType;
use thiserror::Error;

/// A specialized Result type for redundancy device operations.
pub type Result<T> = std::result::Result<T, HsrError>;

/// Step of device finalization, reported when finalization fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStep {
    SelfNode,
    MasterPort,
    Register,
    SlaveA,
    SlaveB,
    OffloadAddress,
    Introspection,
    SupervisionVlan,
}

impl std::fmt::Display for FinalizeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FinalizeStep::SelfNode => "self node",
            FinalizeStep::MasterPort => "master port",
            FinalizeStep::Register => "register",
            FinalizeStep::SlaveA => "slave A",
            FinalizeStep::SlaveB => "slave B",
            FinalizeStep::OffloadAddress => "offload address check",
            FinalizeStep::Introspection => "introspection",
            FinalizeStep::SupervisionVlan => "supervision VLAN",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the redundancy device.
#[derive(Debug, Error)]
pub enum HsrError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MTU {requested} exceeds the maximum of {max} for this device")]
    MtuOutOfRange { requested: u32, max: u32 },

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Supervision frames are disabled")]
    SupervisionDisabled,

    #[error("Finalize failed at {step}: {reason}")]
    Lifecycle {
        step: FinalizeStep,
        #[source]
        reason: Box<HsrError>,
    },

    #[error("Port {port} does not support {capability}")]
    CapabilityUnsupported { port: String, capability: &'static str },

    #[error("Port {0} already exists")]
    PortExists(PortType),

    #[error("Port {port} rejected: {reason}")]
    PortRejected { port: String, reason: &'static str },

    #[error("Device {0} already registered")]
    DeviceExists(String),

    #[error("Unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),

    #[error("Device error: {0}")]
    Device(String),
}

impl HsrError {
    /// Create a new configuration error.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        HsrError::Config(msg.to_string())
    }

    /// Create a new error reported by an underlying port.
    pub fn device(msg: impl std::fmt::Display) -> Self {
        HsrError::Device(msg.to_string())
    }

    pub(crate) fn unsupported(port: &str, capability: &'static str) -> Self {
        HsrError::CapabilityUnsupported {
            port: port.to_string(),
            capability,
        }
    }

    pub(crate) fn at(step: FinalizeStep, reason: HsrError) -> Self {
        HsrError::Lifecycle {
            step,
            reason: Box::new(reason),
        }
    }

    /// The finalize step that failed, for lifecycle errors.
    pub fn failed_step(&self) -> Option<FinalizeStep> {
        match self {
            HsrError::Lifecycle { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl From<HsrError> for common::Error {
    fn from(err: HsrError) -> Self {
        common::Error::hsr(err)
    }
}
