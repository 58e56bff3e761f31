//! Common utilities and types shared across the redundancy workspace.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
