//! Error types for the notification engine.

use crate::types::NotificationId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the notification engine.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The identifier is unknown, or the record was already trashed.
    /// `CloseNotification` on such an id is a caller fault, not a daemon
    /// fault.
    #[error("notification {0} not found")]
    NotFound(NotificationId),

    /// Writing a notification record to its storage path failed.
    #[error("failed to persist notification to {path:?}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record or settings payload could not be (de)serialized.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A per-folder settings file could not be written.
    #[error("failed to write settings file {path:?}")]
    SettingsWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `OpenActiveNotifications` hit a notification whose default action is
    /// ambiguous.
    #[error("notification {0} has more than one action")]
    AmbiguousAction(NotificationId),

    #[error(transparent)]
    Core(#[from] inboxd_core::CoreError),
}
