//! Logging utilities for the redundancy workspace.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize tracing with sensible defaults.
///
/// Uses the RUST_LOG environment variable to control log levels.
/// Default level is INFO.
pub fn init() {
    init_with_level(None, false);
}

/// Initialize tracing with JSON formatting (useful for structured logging).
pub fn init_json() {
    init_with_level(None, true);
}

/// Initialize tracing from configuration values.
///
/// RUST_LOG still wins over `level` when it is set.
pub fn init_with_level(level: Option<&str>, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));

    // try_init: a second initialization (tests, embedding) is not an error
    if json {
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init();
    }
}
