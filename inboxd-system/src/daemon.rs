//! Daemon wiring and the single event loop.
//!
//! One task drives everything: lifecycle events from the bus, commands
//! from detached timer tasks, settings-file invalidations from the
//! filesystem watcher, and the periodic tick that refreshes settings and
//! runs the batch pass. Background work (trash cascades, sound playback,
//! expiry timers) reports back through channels instead of sharing the
//! loop's state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zbus::{ConnectionBuilder, SignalContext};

use inboxd_core::config::DaemonConfig;
use inboxd_domain::events::{EventBus, NotificationEvent};
use inboxd_domain::ingest::IngestionService;
use inboxd_domain::paths::SETTINGS_FILE;
use inboxd_domain::policy::display::EngineCommand;
use inboxd_domain::policy::{PolicyEngine, PolicyEngineConfig};
use inboxd_domain::settings::{SettingsResolver, SharedSettings};
use inboxd_domain::store::NotificationStore;
use inboxd_domain::types::CloseReason;

use crate::collaborators::{ConfigScreen, GioTrash, PaplaySound};
use crate::dbus_interfaces::{InboxdControl, NotificationsServer, NOTIFICATIONS_PATH};

const NOTIFICATIONS_BUS_NAME: &str = "org.freedesktop.Notifications";

/// Builds every component, claims the bus name, and runs the event loop
/// until SIGINT/SIGTERM.
pub async fn run(config: DaemonConfig, root: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let run_id = Uuid::new_v4().to_string();
    info!(?root, %run_id, "starting inboxd");

    let events = EventBus::new();
    let settings: SharedSettings = Arc::new(tokio::sync::RwLock::new(SettingsResolver::new(
        root.clone(),
    )));
    settings.write().await.refresh_all();

    let store = NotificationStore::new(root.clone(), Arc::new(GioTrash), events.clone());
    let service = Arc::new(IngestionService::new(
        root.clone(),
        run_id.clone(),
        events.clone(),
    ));
    let (engine, commands) = PolicyEngine::new(PolicyEngineConfig {
        run_id,
        settings: settings.clone(),
        store: store.clone(),
        events: events.clone(),
        sound_player: Arc::new(PaplaySound),
        screen: Arc::new(ConfigScreen::new(&config.popup)),
        sound_theme_dir: config.sound_theme_dir.clone(),
        default_timeout_ms: config.default_timeout_ms,
        popup_width: config.popup.width,
        popup_height: config.popup.height,
    });
    let engine = Arc::new(Mutex::new(engine));

    let connection = ConnectionBuilder::session()?
        .name(NOTIFICATIONS_BUS_NAME)?
        .serve_at(NOTIFICATIONS_PATH, NotificationsServer::new(service.clone()))?
        .serve_at(
            NOTIFICATIONS_PATH,
            InboxdControl::new(
                service.clone(),
                engine.clone(),
                settings.clone(),
                root.clone(),
            ),
        )?
        .build()
        .await?;
    info!("listening on {NOTIFICATIONS_BUS_NAME}");

    store.load_existing().await;

    let (invalidations_tx, invalidations) = mpsc::unbounded_channel();
    let _watcher = spawn_settings_watcher(&root, invalidations_tx)?;

    event_loop(
        &config,
        connection,
        events,
        service,
        store,
        settings,
        engine,
        commands,
        invalidations,
    )
    .await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn event_loop(
    config: &DaemonConfig,
    connection: zbus::Connection,
    events: EventBus,
    service: Arc<IngestionService>,
    store: NotificationStore,
    settings: SharedSettings,
    engine: Arc<Mutex<PolicyEngine>>,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    mut invalidations: mpsc::UnboundedReceiver<PathBuf>,
) {
    let mut bus = events.subscribe();
    let mut tick = tokio::time::interval(Duration::from_secs(config.tick_interval_secs));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tick.reset(); // skip the immediate first tick

    loop {
        tokio::select! {
            event = bus.recv() => match event {
                Ok(event) => handle_event(event, &connection, &service, &store, &engine).await,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event loop lagged behind the bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            Some(command) = commands.recv() => {
                engine.lock().await.handle_command(command);
            }
            Some(folder) = invalidations.recv() => {
                debug!(?folder, "settings file changed");
                settings.write().await.invalidate(&folder);
            }
            _ = tick.tick() => {
                settings.write().await.refresh_all();
                let count = store.visible_count(&*settings.read().await).await;
                debug!(count, "periodic refresh");
                engine.lock().await.batch_notify().await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
        }
    }
}

/// Dispatches one lifecycle event: the explicit subscription list replaces
/// implicit signal/slot wiring. The store and the policy engine observe the
/// same immutable Ready snapshot; outward-facing events become D-Bus
/// signals.
async fn handle_event(
    event: NotificationEvent,
    connection: &zbus::Connection,
    service: &IngestionService,
    store: &NotificationStore,
    engine: &Mutex<PolicyEngine>,
) {
    match event {
        NotificationEvent::Ready { snapshot } => {
            let Some(record) = service.get(snapshot.note.id) else {
                return;
            };
            if let Err(e) = store.cache(&record).await {
                error!(id = snapshot.note.id, error = %e, "failed to persist notification");
            }
            engine.lock().await.notify(&[record], false).await;
        }
        NotificationEvent::ClosedByCall { id } => {
            engine.lock().await.close_by_id(id, CloseReason::ClosedByCall);
        }
        NotificationEvent::Closed { id, reason } => {
            if let Err(e) = emit_closed(connection, id, reason).await {
                warn!(id, error = %e, "failed to emit NotificationClosed");
            }
        }
        NotificationEvent::Displayed {
            id,
            app_name,
            summary,
            body,
        } => {
            if let Err(e) = emit_displayed(connection, id, app_name, summary, body).await {
                warn!(id, error = %e, "failed to emit NotificationDisplayed");
            }
        }
        NotificationEvent::ActionInvoked { id, key } => {
            if let Err(e) = emit_action(connection, id, key).await {
                warn!(id, error = %e, "failed to emit ActionInvoked");
            }
        }
        NotificationEvent::Trashed { id } => {
            if let Err(e) = emit_purged(connection, id).await {
                warn!(id, error = %e, "failed to emit NotificationPurged");
            }
        }
        NotificationEvent::CacheUpdated => {
            // Tray surfaces re-render on their own schedule; nothing to do
            // on the loop.
        }
    }
}

fn signal_context(connection: &zbus::Connection) -> zbus::Result<SignalContext<'_>> {
    SignalContext::new(connection, NOTIFICATIONS_PATH)
}

async fn emit_closed(
    connection: &zbus::Connection,
    id: i64,
    reason: CloseReason,
) -> zbus::Result<()> {
    let ctxt = signal_context(connection)?;
    NotificationsServer::notification_closed(&ctxt, id as u32, reason.wire_value()).await
}

async fn emit_displayed(
    connection: &zbus::Connection,
    id: i64,
    app_name: String,
    summary: String,
    body: String,
) -> zbus::Result<()> {
    let ctxt = signal_context(connection)?;
    NotificationsServer::notification_displayed(&ctxt, id as u32, app_name, summary, body).await
}

async fn emit_action(connection: &zbus::Connection, id: i64, key: String) -> zbus::Result<()> {
    let ctxt = signal_context(connection)?;
    NotificationsServer::action_invoked(&ctxt, id as u32, key).await
}

async fn emit_purged(connection: &zbus::Connection, id: i64) -> zbus::Result<()> {
    let ctxt = signal_context(connection)?;
    InboxdControl::notification_purged(&ctxt, id as u32).await
}

/// Watches the inbox tree for settings-file changes and reports the
/// affected folder. The watcher handle must stay alive for the daemon's
/// lifetime.
fn spawn_settings_watcher(
    root: &Path,
    invalidations: mpsc::UnboundedSender<PathBuf>,
) -> notify::Result<notify::RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "filesystem watcher error");
                return;
            }
        };
        for path in event.paths {
            if path.file_name().map(|n| n == SETTINGS_FILE).unwrap_or(false) {
                if let Some(folder) = path.parent() {
                    let _ = invalidations.send(folder.to_path_buf());
                }
            }
        }
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}
