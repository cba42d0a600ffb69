//! Typed lifecycle events.
//!
//! The ingestion service, store and policy engine communicate over one
//! broadcast bus with an explicit event enum; subscribers are registered by
//! calling [`EventBus::subscribe`] rather than wired implicitly.

use crate::types::{CachedNotification, CloseReason, NotificationId};
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events published on the daemon's lifecycle bus.
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    /// A notification was admitted. The snapshot is immutable: every
    /// subscriber observes the same values regardless of evaluation order.
    Ready { snapshot: Arc<CachedNotification> },
    /// A `CloseNotification` protocol call closed the record. The outward
    /// `NotificationClosed` signal has already been emitted; consumers must
    /// not re-emit it.
    ClosedByCall { id: NotificationId },
    /// A displayed unit closed; forwarded outward as `NotificationClosed`.
    Closed { id: NotificationId, reason: CloseReason },
    /// A live unit became visible.
    Displayed {
        id: NotificationId,
        app_name: String,
        summary: String,
        body: String,
    },
    /// The user triggered an action on a live unit.
    ActionInvoked { id: NotificationId, key: String },
    /// A record was marked trashed.
    Trashed { id: NotificationId },
    /// Store contents changed; tray surfaces should re-render.
    CacheUpdated,
}

/// Broadcast bus carrying [`NotificationEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<NotificationEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event; a bus with no subscribers drops it silently.
    pub fn publish(&self, event: NotificationEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("no event subscribers registered");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
