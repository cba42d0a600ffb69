//! Seams to external substrates.
//!
//! Trash, audio playback and screen geometry are collaborators of the
//! engine, not part of it; the daemon process supplies implementations and
//! tests supply recording fakes.

use async_trait::async_trait;
use std::path::Path;

/// Moves a path to a recoverable trash location.
#[async_trait]
pub trait TrashSink: Send + Sync {
    async fn trash(&self, path: &Path) -> Result<(), std::io::Error>;
}

/// Plays a sound file asynchronously. Implementations log their own
/// failures; playback never affects delivery.
#[async_trait]
pub trait SoundPlayer: Send + Sync {
    async fn play(&self, path: &Path);
}

/// Available screen area for popup placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub width: u32,
    pub height: u32,
}

/// Screen-geometry query, answered by the windowing substrate (or by
/// configuration when the daemon runs headless).
pub trait Screen: Send + Sync {
    fn available_geometry(&self) -> ScreenGeometry;
}
