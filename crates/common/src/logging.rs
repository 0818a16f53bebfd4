//! Logging setup for the auxiliary binaries.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize tracing with a human readable formatter.
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
