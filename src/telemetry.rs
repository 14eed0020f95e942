//! Logging configuration.
//!
//! This module provides configurable logging with JSON or pretty-print
//! formats, driven by the standard `RUST_LOG` environment filter.
//!
//! # Basic Logging
//!
//! ```rust,no_run
//! use tessera::telemetry::{init_logging, LogFormat};
//!
//! // Pretty logging for development
//! init_logging(LogFormat::Pretty).expect("failed to init logging");
//! ```
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `RUST_LOG`: log-level filter (default: `info`)

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

static INIT: OnceCell<LogFormat> = OnceCell::new();

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    Pretty,
    /// Newline-delimited JSON, one event per line.
    Json,
}

impl LogFormat {
    /// Resolve the format from the `LOG_FORMAT` environment variable.
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") | Ok("JSON") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Subsequent calls return an error rather than replacing the subscriber.
pub fn init_logging(format: LogFormat) -> Result<()> {
    INIT.set(format)
        .map_err(|_| Error::Config("logging already initialized".to_string()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("failed to init logging: {e}")))?;
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .try_init()
                .map_err(|e| Error::Config(format!("failed to init logging: {e}")))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_env_defaults_to_pretty() {
        // LOG_FORMAT is not set in the test environment
        assert_eq!(LogFormat::from_env(), LogFormat::Pretty);
    }
}
