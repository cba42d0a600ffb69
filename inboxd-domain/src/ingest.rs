//! The protocol-facing ingestion service.
//!
//! Admits notification requests, assigns identifiers, computes storage
//! paths, and emits lifecycle events to its subscribers (the store and the
//! policy engine) as immutable snapshots. The service's registry holds only
//! notifications admitted during this run; replayed records live solely in
//! the store's tree.

use crate::error::NotificationError;
use crate::events::{EventBus, NotificationEvent};
use crate::paths;
use crate::types::{
    shared, CachedNotification, CloseReason, Notification, NotificationId, SharedNotification,
};
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::info;

pub const SERVER_NAME: &str = "inboxd";
pub const SERVER_VENDOR: &str = "github.com";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Version of the desktop notification protocol implemented.
pub const PROTOCOL_VERSION: &str = "1.3";

/// Parameters of a `Notify` protocol call.
#[derive(Debug, Clone, Default)]
pub struct NotifyRequest {
    pub app_name: String,
    pub replaces_id: u32,
    pub app_icon: String,
    pub summary: String,
    pub body: String,
    pub actions: Vec<(String, String)>,
    pub hints: HashMap<String, JsonValue>,
    pub expire_timeout: i32,
}

/// Static `GetServerInformation` payload.
pub fn server_information() -> (String, String, String, String) {
    (
        SERVER_NAME.to_string(),
        SERVER_VENDOR.to_string(),
        SERVER_VERSION.to_string(),
        PROTOCOL_VERSION.to_string(),
    )
}

/// Static `GetCapabilities` payload.
pub fn capabilities() -> Vec<String> {
    [
        "action-icons",
        "actions",
        "body",
        "body-hyperlinks",
        "body-images",
        "body-markup",
        "persistence",
        "sound",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub struct IngestionService {
    root: PathBuf,
    run_id: String,
    next_id: AtomicI64,
    registry: RwLock<HashMap<NotificationId, SharedNotification>>,
    events: EventBus,
}

impl IngestionService {
    pub fn new(root: PathBuf, run_id: String, events: EventBus) -> Self {
        info!(?root, %run_id, "started ingestion service");
        IngestionService {
            root,
            run_id,
            next_id: AtomicI64::new(1),
            registry: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Admits a notification. A nonzero `replaces_id` is returned as the
    /// identifier and never allocates; otherwise the next unused positive
    /// integer is assigned (the protocol reserves zero for "no
    /// notification"). Emits a [`NotificationEvent::Ready`] carrying an
    /// immutable snapshot.
    pub fn notify(&self, request: NotifyRequest) -> NotificationId {
        info!(
            app_name = %request.app_name,
            summary = %request.summary,
            "got notification"
        );

        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        let id = if request.replaces_id != 0 {
            NotificationId::from(request.replaces_id)
        } else {
            loop {
                let candidate = self.next_id.fetch_add(1, Ordering::Relaxed);
                if !registry.contains_key(&candidate) {
                    break candidate;
                }
            }
        };

        let note = Notification {
            id,
            app_name: request.app_name,
            replaces_id: request.replaces_id,
            app_icon: request.app_icon,
            summary: request.summary,
            body: request.body,
            actions: request.actions,
            hints: request.hints,
            expire_timeout: request.expire_timeout,
            run_id: self.run_id.clone(),
        };
        let path = paths::output_path(&self.root, &note);
        let cached = CachedNotification::new(note, path, Utc::now());

        let snapshot = Arc::new(cached.clone());
        registry.insert(id, shared(cached));
        drop(registry);

        self.events.publish(NotificationEvent::Ready { snapshot });
        info!(id, "notification ready");
        id
    }

    /// Looks up a live record admitted during this run.
    pub fn get(&self, id: NotificationId) -> Option<SharedNotification> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Handles a `CloseNotification` protocol call: stamps the close,
    /// emits the outward `NotificationClosed(ClosedByCall)` signal exactly
    /// once, plus a distinct internal event so downstream consumers can
    /// retire the display unit without re-signalling.
    ///
    /// Unknown or already-trashed identifiers are a [`NotificationError::NotFound`]
    /// fault surfaced to the caller.
    pub fn close_notification(&self, id: NotificationId) -> Result<(), NotificationError> {
        let record = self.get(id).ok_or(NotificationError::NotFound(id))?;
        {
            let mut guard = record.write().unwrap_or_else(|e| e.into_inner());
            if guard.trashed {
                return Err(NotificationError::NotFound(id));
            }
            guard.closed_at = Some(Utc::now());
        }

        self.events.publish(NotificationEvent::Closed {
            id,
            reason: CloseReason::ClosedByCall,
        });
        self.events.publish(NotificationEvent::ClosedByCall { id });
        Ok(())
    }

    /// Closes every not-yet-closed notification that currently has an
    /// active display unit, per the supplied query.
    pub fn close_active_notifications<F>(&self, has_active_unit: F) -> Result<(), NotificationError>
    where
        F: Fn(NotificationId) -> bool,
    {
        let open: Vec<NotificationId> = {
            let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
            registry
                .iter()
                .filter(|(id, record)| {
                    let guard = record.read().unwrap_or_else(|e| e.into_inner());
                    guard.closed_at.is_none() && has_active_unit(**id)
                })
                .map(|(id, _)| *id)
                .collect()
        };
        for id in open {
            self.close_notification(id)?;
        }
        Ok(())
    }

    /// Invokes the default action of every open notification. A
    /// notification with no action is skipped; one with several is an
    /// error, since its default is ambiguous.
    pub fn open_active_notifications(&self) -> Result<(), NotificationError> {
        let mut to_invoke: Vec<(NotificationId, String)> = Vec::new();
        {
            let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
            for (id, record) in registry.iter() {
                let guard = record.read().unwrap_or_else(|e| e.into_inner());
                if guard.closed_at.is_some() {
                    continue;
                }
                match guard.note.actions.as_slice() {
                    [] => {}
                    [(key, _)] => to_invoke.push((*id, key.clone())),
                    _ => return Err(NotificationError::AmbiguousAction(*id)),
                }
            }
        }
        for (id, key) in to_invoke {
            self.events
                .publish(NotificationEvent::ActionInvoked { id, key });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn service(dir: &std::path::Path) -> (IngestionService, tokio::sync::broadcast::Receiver<NotificationEvent>) {
        let events = EventBus::new();
        let receiver = events.subscribe();
        (
            IngestionService::new(dir.to_path_buf(), "r1".to_string(), events),
            receiver,
        )
    }

    fn request(summary: &str) -> NotifyRequest {
        NotifyRequest {
            app_name: "mailer".into(),
            summary: summary.into(),
            expire_timeout: -1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fresh_ids_are_distinct_positive_integers() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _rx) = service(dir.path());

        let ids: Vec<NotificationId> =
            (0..5).map(|_| service.notify(request("mail"))).collect();
        let mut unique = ids.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 5);
        assert!(ids.iter().all(|id| *id > 0));
    }

    #[tokio::test]
    async fn replaces_id_is_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _rx) = service(dir.path());

        let mut req = request("update");
        req.replaces_id = 42;
        assert_eq!(service.notify(req.clone()), 42);
        assert_eq!(service.notify(req), 42);
        // The allocator still hands out unused ids afterwards.
        let fresh = service.notify(request("new"));
        assert!(fresh > 0 && fresh != 42);
    }

    #[tokio::test]
    async fn ready_event_carries_matching_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (service, mut rx) = service(dir.path());

        let id = service.notify(request("Build done"));
        match rx.try_recv().unwrap() {
            NotificationEvent::Ready { snapshot } => {
                assert_eq!(snapshot.note.id, id);
                assert_eq!(snapshot.note.summary, "Build done");
                assert_eq!(snapshot.note.run_id, "r1");
                assert!(snapshot.path.starts_with(dir.path()));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _rx) = service(dir.path());
        assert!(matches!(
            service.close_notification(9),
            Err(NotificationError::NotFound(9))
        ));
    }

    #[tokio::test]
    async fn close_emits_signal_and_internal_event_once() {
        let dir = tempfile::tempdir().unwrap();
        let (service, mut rx) = service(dir.path());
        let id = service.notify(request("mail"));
        let _ = rx.try_recv(); // Ready

        service.close_notification(id).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            NotificationEvent::Closed { reason: CloseReason::ClosedByCall, .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            NotificationEvent::ClosedByCall { .. }
        ));
        assert!(rx.try_recv().is_err());

        let record = service.get(id).unwrap();
        assert!(record.read().unwrap().closed_at.is_some());
    }

    #[tokio::test]
    async fn close_trashed_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _rx) = service(dir.path());
        let id = service.notify(request("mail"));
        service.get(id).unwrap().write().unwrap().trashed = true;
        assert!(matches!(
            service.close_notification(id),
            Err(NotificationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn open_active_requires_unambiguous_default_action() {
        let dir = tempfile::tempdir().unwrap();
        let (service, mut rx) = service(dir.path());

        let mut single = request("one action");
        single.actions = vec![("default".into(), "Open".into())];
        let id = service.notify(single);
        let _ = rx.try_recv();

        service.open_active_notifications().unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            NotificationEvent::ActionInvoked { id: got, .. } if got == id
        ));

        let mut multi = request("two actions");
        multi.actions = vec![
            ("a".into(), "A".into()),
            ("b".into(), "B".into()),
        ];
        let bad = service.notify(multi);
        assert!(matches!(
            service.open_active_notifications(),
            Err(NotificationError::AmbiguousAction(id)) if id == bad
        ));
    }

    #[tokio::test]
    async fn close_active_honors_active_unit_query() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _rx) = service(dir.path());
        let shown = service.notify(request("shown"));
        let hidden = service.notify(request("hidden"));

        service
            .close_active_notifications(|id| id == shown)
            .unwrap();

        assert!(service.get(shown).unwrap().read().unwrap().closed_at.is_some());
        assert!(service.get(hidden).unwrap().read().unwrap().closed_at.is_none());
    }
}
