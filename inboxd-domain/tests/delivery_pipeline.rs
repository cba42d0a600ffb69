//! End-to-end tests over a temporary inbox tree: ingestion through
//! persistence, display policy, batching and close routing.

use chrono::{Duration as ChronoDuration, Utc};
use inboxd_domain::collaborators::{Screen, ScreenGeometry, SoundPlayer, TrashSink};
use inboxd_domain::events::{EventBus, NotificationEvent};
use inboxd_domain::ingest::{IngestionService, NotifyRequest};
use inboxd_domain::policy::{PolicyEngine, PolicyEngineConfig};
use inboxd_domain::settings::{SettingsResolver, SharedSettings, TimedSetting};
use inboxd_domain::store::NotificationStore;
use inboxd_domain::types::{
    shared, CachedNotification, CloseReason, Notification, NotificationId, SharedNotification,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

struct NullSink;

#[async_trait::async_trait]
impl TrashSink for NullSink {
    async fn trash(&self, path: &Path) -> Result<(), std::io::Error> {
        if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
    }
}

struct RecordingPlayer {
    played: Mutex<Vec<PathBuf>>,
}

#[async_trait::async_trait]
impl SoundPlayer for RecordingPlayer {
    async fn play(&self, path: &Path) {
        self.played.lock().unwrap().push(path.to_path_buf());
    }
}

struct BigScreen;

impl Screen for BigScreen {
    fn available_geometry(&self) -> ScreenGeometry {
        ScreenGeometry {
            width: 1920,
            height: 1080,
        }
    }
}

struct Fixture {
    root: PathBuf,
    events: EventBus,
    service: IngestionService,
    store: NotificationStore,
    settings: SharedSettings,
    engine: PolicyEngine,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let events = EventBus::new();
    let store = NotificationStore::new(root.clone(), Arc::new(NullSink), events.clone());
    let settings: SharedSettings = Arc::new(tokio::sync::RwLock::new(SettingsResolver::new(
        root.clone(),
    )));
    let service = IngestionService::new(root.clone(), "run-1".to_string(), events.clone());
    let (engine, _commands) = PolicyEngine::new(PolicyEngineConfig {
        run_id: "run-1".to_string(),
        settings: settings.clone(),
        store: store.clone(),
        events: events.clone(),
        sound_player: Arc::new(RecordingPlayer {
            played: Mutex::new(Vec::new()),
        }),
        screen: Arc::new(BigScreen),
        sound_theme_dir: PathBuf::from("/usr/share/sounds/freedesktop/stereo"),
        default_timeout_ms: 5000,
        popup_width: 256,
        popup_height: 96,
    });
    Fixture {
        root,
        events,
        service,
        store,
        settings,
        engine,
        _dir: dir,
    }
}

fn drain(rx: &mut broadcast::Receiver<NotificationEvent>) -> Vec<NotificationEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn record_in(root: &Path, id: NotificationId, summary: &str, body: &str) -> SharedNotification {
    let note = Notification {
        id,
        app_name: "mailer".into(),
        replaces_id: 0,
        app_icon: String::new(),
        summary: summary.into(),
        body: body.into(),
        actions: vec![("default".into(), "Open".into())],
        hints: HashMap::new(),
        expire_timeout: 5000,
        run_id: "run-1".into(),
    };
    let path = root.join("mailer").join("inbox").join(format!("run-1-{id}.json"));
    shared(CachedNotification::new(note, path, Utc::now()))
}

#[tokio::test]
async fn ingested_notification_is_persisted_and_displayed() {
    let mut fx = fixture();
    let mut rx = fx.events.subscribe();

    let id = fx.service.notify(NotifyRequest {
        app_name: "Mailer".into(),
        summary: "New Mail".into(),
        body: "hello".into(),
        expire_timeout: 0,
        ..Default::default()
    });

    // The daemon loop reacts to Ready by caching and displaying; do the
    // same here with the snapshot's shared record.
    let record = fx.service.get(id).unwrap();
    fx.store.cache(&record).await.unwrap();
    fx.engine.notify(&[record], false).await;

    let on_disk = fx
        .root
        .join("mailer")
        .join("new-mail")
        .join(format!("run-1-{id}.json"));
    assert!(on_disk.is_file(), "notification must be persisted");

    let units: Vec<_> = fx.engine.visible_units().collect();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].key, ("run-1".to_string(), id));

    let displayed = drain(&mut rx).into_iter().any(|event| {
        matches!(event, NotificationEvent::Displayed { id: got, .. } if got == id)
    });
    assert!(displayed, "a live unit announces its display");
}

#[tokio::test]
async fn batch_coalesces_summaries_bodies_and_expiries() {
    let mut fx = fixture();

    let a = record_in(&fx.root, 1, "A", "x");
    let b = record_in(&fx.root, 2, "B", "y");
    {
        let mut guard = b.write().unwrap();
        guard.note.expire_timeout = 3000;
    }
    {
        let mut guard = a.write().unwrap();
        guard.note.expire_timeout = 5000;
    }

    fx.engine.notify(&[a.clone(), b.clone()], true).await;

    let units: Vec<_> = fx.engine.visible_units().collect();
    assert_eq!(units.len(), 1);
    let unit = units[0];
    assert_eq!(unit.body, "A\nx\n---\nB\ny");
    assert_eq!(unit.summary, "2 new notifications from mailer");
    assert_eq!(unit.expire_timeout, 8000);

    // The folder watermark advanced to the highest delivered id.
    let folder = fx.root.join("mailer").join("inbox");
    assert_eq!(fx.engine.last_notified(&folder), 2);
}

#[tokio::test]
async fn backoff_defers_immediate_delivery_to_the_batch_pass() {
    let mut fx = fixture();
    let folder = fx.root.join("mailer").join("inbox");
    std::fs::create_dir_all(&folder).unwrap();

    std::fs::write(
        folder.join(".settings.json"),
        serde_json::json!({ "notification_backoff_minutes": 10 }).to_string(),
    )
    .unwrap();
    fx.settings.write().await.invalidate(&folder);

    let record = record_in(&fx.root, 7, "Ping", "pong");
    fx.store.cache(&record).await.unwrap();

    // Immediate delivery is suppressed by the backoff interval.
    fx.engine.notify(&[record.clone()], false).await;
    assert_eq!(fx.engine.visible_units().count(), 0);

    // The periodic batch pass rolls it up while inside the window...
    fx.engine.batch_notify().await;
    assert_eq!(fx.engine.visible_units().count(), 1);
    assert_eq!(fx.engine.last_notified(&folder), 7);

    // ...and does not deliver the same record twice.
    fx.engine.batch_notify().await;
    assert_eq!(fx.engine.visible_units().count(), 1);
}

#[tokio::test]
async fn dnd_catch_up_delivers_exactly_once() {
    let mut fx = fixture();
    let folder = fx.root.join("mailer").join("inbox");
    std::fs::create_dir_all(&folder).unwrap();

    // A do-not-disturb window that ended after daemon start.
    let dnd_end = Utc::now();
    fx.settings
        .write()
        .await
        .write_datetime_setting(
            &folder,
            TimedSetting::DoNotDisturb,
            inboxd_domain::settings::TimedValue::Until(dnd_end),
        )
        .unwrap();

    // Arrived while (or just after) the window ran.
    let record = record_in(&fx.root, 9, "Missed", "while away");
    record.write().unwrap().at = dnd_end + ChronoDuration::milliseconds(1);
    fx.store.cache(&record).await.unwrap();

    fx.engine.batch_notify().await;
    let units: Vec<_> = fx.engine.visible_units().collect();
    assert_eq!(units.len(), 1);
    assert!(units[0].is_batch);
    assert_eq!(fx.engine.last_notified(&folder), 9);

    // Exactly once: the watermark suppresses re-delivery.
    fx.engine.batch_notify().await;
    assert_eq!(fx.engine.visible_units().count(), 1);
}

#[tokio::test]
async fn replayed_notifications_never_signal_outward() {
    let mut fx = fixture();
    let mut rx = fx.events.subscribe();

    // Created before daemon start: a record replayed from disk.
    let record = record_in(&fx.root, 3, "Old", "news");
    record.write().unwrap().at = Utc::now() - ChronoDuration::hours(2);

    fx.engine.notify(&[record], false).await;
    assert_eq!(fx.engine.visible_units().count(), 1);

    let key = ("run-1".to_string(), 3);
    fx.engine.action_invoked(&key, "default");

    let events = drain(&mut rx);
    assert!(
        !events.iter().any(|e| matches!(
            e,
            NotificationEvent::Displayed { .. }
                | NotificationEvent::ActionInvoked { .. }
                | NotificationEvent::Closed { .. }
        )),
        "historical units are display-only: {events:?}"
    );
}

#[tokio::test]
async fn close_by_call_retires_unit_without_resignalling() {
    let mut fx = fixture();
    let mut rx = fx.events.subscribe();

    let id = fx.service.notify(NotifyRequest {
        app_name: "Mailer".into(),
        summary: "New Mail".into(),
        expire_timeout: 0,
        ..Default::default()
    });
    let record = fx.service.get(id).unwrap();
    fx.store.cache(&record).await.unwrap();
    fx.engine.notify(&[record], false).await;
    let _ = drain(&mut rx);

    // Protocol close: the service signals once, the engine stays silent.
    fx.service.close_notification(id).unwrap();
    fx.engine.close_by_id(id, CloseReason::ClosedByCall);

    let events = drain(&mut rx);
    let outward: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, NotificationEvent::Closed { .. }))
        .collect();
    assert_eq!(outward.len(), 1, "exactly one outward close: {events:?}");
    assert_eq!(fx.engine.visible_units().count(), 0);
}

#[tokio::test]
async fn dismissing_a_unit_signals_and_trashes_the_file() {
    let mut fx = fixture();
    let mut rx = fx.events.subscribe();

    let id = fx.service.notify(NotifyRequest {
        app_name: "Mailer".into(),
        summary: "New Mail".into(),
        expire_timeout: 0,
        ..Default::default()
    });
    let record = fx.service.get(id).unwrap();
    fx.store.cache(&record).await.unwrap();
    fx.engine.notify(&[record.clone()], false).await;
    let _ = drain(&mut rx);

    let path = record.read().unwrap().path.clone();
    assert!(path.is_file());

    fx.engine.close_by_id(id, CloseReason::DismissedByUser);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        NotificationEvent::Closed { reason: CloseReason::DismissedByUser, .. }
    )));

    // The dismissal queued a background trash of the backing file.
    for _ in 0..50 {
        if !path.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(!path.exists(), "dismissed notification file is trashed");
    assert!(record.read().unwrap().trashed);
}
