//! Core infrastructure layer for the inboxd notification daemon.
//!
//! This crate provides the foundational pieces shared by the domain engine
//! and the system layer: error types, the logging bootstrap, daemon
//! configuration, and small filesystem/string utilities.

pub mod config;
pub mod error;
pub mod logging;
pub mod utils;

pub use config::DaemonConfig;
pub use error::{ConfigError, CoreError};
