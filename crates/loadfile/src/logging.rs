//! Logging initialization.
//!
//! Installs a global `tracing` subscriber and forwards `log` records into it,
//! so both the `log` macros and `tracing` spans end up in one stream.
//! `RUST_LOG`, when set, takes precedence over the configured level.

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::config::{LogConfig, LogFormat};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("A global logger is already installed")]
    AlreadyInitialized,
}

/// Builds the filter: `RUST_LOG` if present and valid, else the configured level.
pub fn build_filter(config: &LogConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| LoggingError::InvalidFilter {
        filter: config.level.clone(),
        reason: e.to_string(),
    })
}

/// Installs the global subscriber. Call once at start-up.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Text => {
            let subscriber = registry.with(fmt::layer().with_target(true));
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|_| LoggingError::AlreadyInitialized)?;
        }
        LogFormat::Json => {
            let subscriber = registry.with(fmt::layer().json().with_current_span(true));
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|_| LoggingError::AlreadyInitialized)?;
        }
    }

    tracing_log::LogTracer::init().map_err(|_| LoggingError::AlreadyInitialized)?;

    log::debug!("Logging initialized ({:?}, level {})", config.format, config.level);
    Ok(())
}
