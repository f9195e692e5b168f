//! # Setup Logging
//!
//! Installs the process-wide `tracing` subscriber:
//! - a filter from `RUST_LOG`, falling back to the configured level,
//! - a human-readable console layer with targets and ANSI colors,
//! - a JSON layer written to a daily rotating file `<log_dir>/<app_name>.<date>`.
//!
//! The file layer writes through a non-blocking worker. The returned
//! [`WorkerGuard`] must be held for the life of the process; dropping it
//! flushes and stops the worker.

use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    LogDir(#[from] io::Error),
    #[error("Invalid log filter {directive:?}: {source}")]
    Filter {
        directive: String,
        #[source]
        source: ParseError,
    },
    #[error("A global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

/// `RUST_LOG` when set and valid, otherwise `level`.
pub fn env_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|source| LoggingError::Filter {
            directive: level.to_string(),
            source,
        })
}

/// Installs the global subscriber. Call once, early in `main`.
pub fn init_logging(log_dir: &Path, level: &str, app_name: &str) -> Result<WorkerGuard, LoggingError> {
    std::fs::create_dir_all(log_dir)?;
    let filter = env_filter(level)?;

    let (file_writer, guard) = non_blocking(rolling::daily(log_dir, app_name));

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(file_writer).json();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(log_level = level, log_dir = %log_dir.display(), "Logging initialized");
    Ok(guard)
}
