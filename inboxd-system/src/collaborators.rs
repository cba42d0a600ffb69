//! Process-level implementations of the engine's collaborator seams.

use async_trait::async_trait;
use inboxd_core::config::PopupConfig;
use inboxd_domain::collaborators::{Screen, ScreenGeometry, SoundPlayer, TrashSink};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

/// Recoverable deletion through `gio trash`, so trashed notifications land
/// in the desktop's wastebasket instead of being unlinked.
pub struct GioTrash;

#[async_trait]
impl TrashSink for GioTrash {
    async fn trash(&self, path: &Path) -> Result<(), std::io::Error> {
        let status = Command::new("gio").arg("trash").arg(path).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("gio trash exited with {status}"),
            ))
        }
    }
}

/// Fire-and-forget playback through `paplay`. Failures are logged and
/// never affect delivery.
pub struct PaplaySound;

#[async_trait]
impl SoundPlayer for PaplaySound {
    async fn play(&self, path: &Path) {
        if !path.exists() {
            debug!(?path, "sound file does not exist, skipping playback");
            return;
        }
        match Command::new("paplay").arg(path).status().await {
            Ok(status) if !status.success() => {
                warn!(?path, %status, "sound playback failed")
            }
            Err(e) => warn!(?path, error = %e, "could not spawn sound player"),
            Ok(_) => {}
        }
    }
}

/// Screen geometry from configuration, for installs without a windowing
/// substrate to query.
pub struct ConfigScreen {
    geometry: ScreenGeometry,
}

impl ConfigScreen {
    pub fn new(popup: &PopupConfig) -> Self {
        ConfigScreen {
            geometry: ScreenGeometry {
                width: popup.screen_width,
                height: popup.screen_height,
            },
        }
    }
}

impl Screen for ConfigScreen {
    fn available_geometry(&self) -> ScreenGeometry {
        self.geometry
    }
}
