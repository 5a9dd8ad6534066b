//! Structured logging configuration.
//!
//! Initializes the global `tracing` subscriber from a [`LoggingConfig`]:
//! console or file output, plain or JSON formatting, level from config with
//! an `RUST_LOG`-style environment override.

use crate::config::LoggingConfig;
use crate::error::{GateError, Result};
use std::sync::Arc;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;

/// Install the global subscriber described by `config`.
///
/// Safe to call once per process; a second call reports a configuration
/// error rather than panicking, so embedding applications that install
/// their own subscriber keep working.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(config.log_level.into())
        .from_env_lossy();

    let result = if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            GateError::ConfigError("log_file_path must be set when log_to_file is true".into())
        })?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| GateError::ConfigError(format!("Failed to open log file: {e}")))?;

        if config.json_format {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .try_init()
        } else {
            fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .try_init()
        }
    } else if config.json_format {
        fmt().json().with_env_filter(filter).try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|e| GateError::ConfigError(format!("Failed to install subscriber: {e}")))
}
