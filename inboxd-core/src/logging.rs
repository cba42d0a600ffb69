//! Logging bootstrap for inboxd.
//!
//! Built on the `tracing` ecosystem: console output filtered through
//! `RUST_LOG` (defaulting to `info`), with an optional daily-rolling file
//! layer for long-running daemon installs.

use crate::config::LoggingConfig;
use crate::error::CoreError;
use crate::utils::fs::ensure_dir_exists;

use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes a minimal logging setup, directing messages to `stderr`.
///
/// Intended for tests and for early startup before the configuration is
/// loaded. Filters based on `RUST_LOG`, defaulting to `info`. Errors (for
/// example, a globally installed subscriber) are ignored.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}

/// Initializes the daemon's logging from [`LoggingConfig`].
///
/// Always installs a console layer; adds a non-blocking daily-rolling file
/// layer when `file` is set. Returns the appender's [`WorkerGuard`], which
/// the caller must keep alive for the lifetime of the process so buffered
/// log lines are flushed on shutdown.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, CoreError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr));

    match &config.file {
        Some(path) => {
            let (file_layer, guard) = file_layer(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| CoreError::LoggingInitialization(e.to_string()))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .try_init()
                .map_err(|e| CoreError::LoggingInitialization(e.to_string()))?;
            Ok(None)
        }
    }
}

fn file_layer<S>(
    log_path: &Path,
) -> Result<(impl tracing_subscriber::Layer<S>, WorkerGuard), CoreError>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir_exists(parent)?;
        }
    }

    let appender = tracing_appender::rolling::daily(
        log_path.parent().unwrap_or_else(|| Path::new(".")),
        log_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("inboxd.log")),
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer().with_writer(writer).with_ansi(false);
    Ok((layer, guard))
}
