//! Structured logging setup using `tracing-subscriber`.
//!
//! Everything goes to stderr so the container runtime collects it. Two
//! formats:
//! - **Text**: human-readable lines (default)
//! - **JSON**: one object per line, for log shippers

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Initialise the global subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the level is `debug` when verbose
/// logging is enabled and `info` when not.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.verbose)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))
}
