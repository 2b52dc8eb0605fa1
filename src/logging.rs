//! Log output: stderr plus an optional daily log file

use crate::config::LogConfig;
use crate::error::{Error, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Log files are named `showcase.<date>.log`
pub const LOG_FILE_PREFIX: &str = "showcase";

/// Daily-rotated appender under `config.dir`, or `None` when file logging is off
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or opened.
pub fn file_appender(config: &LogConfig) -> Result<Option<RollingFileAppender>> {
    if !config.file {
        return Ok(None);
    }
    std::fs::create_dir_all(&config.dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(config.max_files.max(1))
        .build(&config.dir)
        .map_err(|e| {
            Error::config(
                "logging.dir",
                format!("cannot open log file in {}: {}", config.dir.display(), e),
            )
        })?;
    Ok(Some(appender))
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `level`. The returned guard flushes the
/// log file when dropped, so hold it until the process exits.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened or a subscriber is
/// already installed.
pub fn init(level: &str, config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match file_appender(config)? {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to install logger: {}", e)))?;
    Ok(guard)
}
