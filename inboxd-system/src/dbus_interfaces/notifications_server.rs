//! The `org.freedesktop.Notifications` server, plus the daemon-private
//! `com.github.Inboxd` control interface served at the same object path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use zbus::zvariant::Value;
use zbus::{dbus_interface, fdo, SignalContext};

use inboxd_domain::error::NotificationError;
use inboxd_domain::ingest::{self, IngestionService, NotifyRequest};
use inboxd_domain::policy::PolicyEngine;
use inboxd_domain::settings::{SharedSettings, TimedSetting, TimedValue};

pub const NOTIFICATIONS_PATH: &str = "/org/freedesktop/Notifications";

fn to_fdo(error: NotificationError) -> fdo::Error {
    match error {
        NotificationError::NotFound(id) => {
            fdo::Error::InvalidArgs(format!("notification {id} not found"))
        }
        other => fdo::Error::Failed(other.to_string()),
    }
}

/// The freedesktop notification protocol surface.
pub struct NotificationsServer {
    service: Arc<IngestionService>,
}

impl NotificationsServer {
    pub fn new(service: Arc<IngestionService>) -> Self {
        NotificationsServer { service }
    }
}

#[dbus_interface(name = "org.freedesktop.Notifications")]
impl NotificationsServer {
    async fn notify(
        &self,
        app_name: String,
        replaces_id: u32,
        app_icon: String,
        summary: String,
        body: String,
        actions: Vec<String>,
        hints: HashMap<String, Value<'_>>,
        expire_timeout: i32,
    ) -> u32 {
        let actions = actions
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        let hints = hints
            .iter()
            .map(|(key, value)| (key.clone(), value_to_json(value)))
            .collect();

        let id = self.service.notify(NotifyRequest {
            app_name,
            replaces_id,
            app_icon,
            summary,
            body,
            actions,
            hints,
            expire_timeout,
        });
        id as u32
    }

    async fn close_notification(&self, id: u32) -> fdo::Result<()> {
        self.service
            .close_notification(i64::from(id))
            .map_err(to_fdo)
    }

    async fn get_capabilities(&self) -> Vec<String> {
        ingest::capabilities()
    }

    async fn get_server_information(&self) -> (String, String, String, String) {
        ingest::server_information()
    }

    #[dbus_interface(signal)]
    pub async fn notification_closed(
        ctxt: &SignalContext<'_>,
        id: u32,
        reason: u32,
    ) -> zbus::Result<()>;

    #[dbus_interface(signal)]
    pub async fn action_invoked(
        ctxt: &SignalContext<'_>,
        id: u32,
        action_key: String,
    ) -> zbus::Result<()>;

    /// Emitted when a live display unit becomes visible.
    #[dbus_interface(signal)]
    pub async fn notification_displayed(
        ctxt: &SignalContext<'_>,
        id: u32,
        app_name: String,
        summary: String,
        body: String,
    ) -> zbus::Result<()>;
}

/// Daemon-private controls used by the tray surface.
pub struct InboxdControl {
    service: Arc<IngestionService>,
    engine: Arc<Mutex<PolicyEngine>>,
    settings: SharedSettings,
    root: PathBuf,
}

impl InboxdControl {
    pub fn new(
        service: Arc<IngestionService>,
        engine: Arc<Mutex<PolicyEngine>>,
        settings: SharedSettings,
        root: PathBuf,
    ) -> Self {
        InboxdControl {
            service,
            engine,
            settings,
            root,
        }
    }
}

#[dbus_interface(name = "com.github.Inboxd")]
impl InboxdControl {
    /// Closes every open notification that currently has a display unit.
    async fn close_active_notifications(&self) -> fdo::Result<()> {
        let engine = self.engine.lock().await;
        self.service
            .close_active_notifications(|id| engine.has_active_unit(id))
            .map_err(to_fdo)
    }

    /// Invokes the default action of every open notification.
    async fn open_active_notifications(&self) -> fdo::Result<()> {
        self.service.open_active_notifications().map_err(to_fdo)
    }

    /// Sets a folder's do-not-disturb window. `until` is an RFC 3339
    /// timestamp, or empty for "forever".
    async fn set_do_not_disturb(&self, folder: String, until: String) -> fdo::Result<()> {
        let folder = self.root.join(folder);
        let value = if until.is_empty() {
            TimedValue::Forever
        } else {
            let parsed: DateTime<Utc> = until
                .parse()
                .map_err(|e| fdo::Error::InvalidArgs(format!("unparsable timestamp: {e}")))?;
            TimedValue::Until(parsed)
        };
        debug!(?folder, ?value, "setting do-not-disturb");
        self.settings
            .write()
            .await
            .write_datetime_setting(&folder, TimedSetting::DoNotDisturb, value)
            .map_err(to_fdo)
    }

    /// Emitted when a cached notification is moved to the trash.
    #[dbus_interface(signal)]
    pub async fn notification_purged(ctxt: &SignalContext<'_>, id: u32) -> zbus::Result<()>;
}

/// Converts a D-Bus variant into the JSON value stored in the hint map.
/// Byte arrays (icon and image payloads) become base64 strings so records
/// stay valid JSON on disk.
fn value_to_json(value: &Value<'_>) -> JsonValue {
    match value {
        Value::U8(v) => JsonValue::from(*v),
        Value::Bool(v) => JsonValue::from(*v),
        Value::I16(v) => JsonValue::from(*v),
        Value::U16(v) => JsonValue::from(*v),
        Value::I32(v) => JsonValue::from(*v),
        Value::U32(v) => JsonValue::from(*v),
        Value::I64(v) => JsonValue::from(*v),
        Value::U64(v) => JsonValue::from(*v),
        Value::F64(v) => JsonValue::from(*v),
        Value::Str(v) => JsonValue::from(v.as_str()),
        Value::Signature(v) => JsonValue::from(v.as_str()),
        Value::ObjectPath(v) => JsonValue::from(v.as_str()),
        Value::Value(inner) => value_to_json(inner),
        Value::Array(array) => {
            if array.element_signature().as_str() == "y" {
                let bytes: Vec<u8> = array
                    .iter()
                    .filter_map(|item| match item {
                        Value::U8(b) => Some(*b),
                        _ => None,
                    })
                    .collect();
                JsonValue::from(BASE64.encode(bytes))
            } else {
                JsonValue::Array(array.iter().map(value_to_json).collect())
            }
        }
        Value::Structure(structure) => {
            JsonValue::Array(structure.fields().iter().map(value_to_json).collect())
        }
        Value::Dict(dict) => {
            match <HashMap<String, zbus::zvariant::OwnedValue>>::try_from(dict.clone()) {
                Ok(map) => JsonValue::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, value_to_json(&Value::from(v))))
                        .collect(),
                ),
                Err(e) => {
                    warn!(error = %e, "dropping hint dict with non-string keys");
                    JsonValue::Null
                }
            }
        }
        Value::Fd(_) => JsonValue::Null,
    }
}
