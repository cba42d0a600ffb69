//! inboxd — desktop notification intake-and-delivery daemon.
//!
//! Usage: `inboxd <notification_storage_directory>` (the directory may also
//! come from the configuration file).

use inboxd_core::config::DaemonConfig;
use inboxd_core::logging;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match DaemonConfig::load() {
        Ok(config) => config,
        Err(e) => {
            logging::init_minimal_logging();
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match logging::init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            logging::init_minimal_logging();
            error!(error = %e, "failed to initialize logging");
            return ExitCode::FAILURE;
        }
    };

    let root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| config.root_path.clone());
    let Some(root) = root else {
        eprintln!("usage: inboxd <notification_storage_directory>");
        return ExitCode::FAILURE;
    };
    if !root.is_dir() {
        error!(?root, "notification storage directory does not exist");
        return ExitCode::FAILURE;
    }

    match inboxd_system::daemon::run(config, root).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "daemon terminated with error");
            ExitCode::FAILURE
        }
    }
}
