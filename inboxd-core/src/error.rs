//! Error handling for the inboxd core layer.
//!
//! Defines the error types shared across the daemon's foundation using the
//! `thiserror` crate. The main error type for this crate is [`CoreError`],
//! which wraps more specific errors like [`ConfigError`].

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for the inboxd daemon.
///
/// Represents all failures that can occur in the core layer. Higher layers
/// wrap this type rather than redefining filesystem or configuration
/// failures of their own.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Errors related to configuration loading, parsing, or validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors that occur during the initialization of the logging system.
    #[error("logging initialization failed: {0}")]
    LoggingInitialization(String),

    /// Filesystem operations that fail outside of configuration handling,
    /// such as creating the inbox root or reading a marker file.
    #[error("filesystem error: {message} (path: {path:?})")]
    Filesystem {
        message: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// General I/O errors not covered by a more specific variant.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input provided to a core function.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Error type for configuration-related operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file from {path:?}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML.
    #[error("failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The configuration parsed but holds invalid values.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}
