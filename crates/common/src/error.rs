//! Common error types shared by the redundancy workspace.

use std::fmt;

/// A specialized Result type for workspace-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for binaries and glue code.
///
/// Library crates keep their own error enums and convert into this one at
/// the process boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redundancy device error: {0}")]
    Hsr(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new redundancy device error.
    pub fn hsr(msg: impl fmt::Display) -> Self {
        Error::Hsr(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
