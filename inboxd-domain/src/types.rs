//! Notification records and the in-memory folder tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Process-scoped notification identifier.
///
/// Positive for notifications admitted over the protocol (zero is reserved
/// by the protocol for "no notification" and never assigned); negative only
/// for internally synthesized error notifications.
pub type NotificationId = i64;

/// Identifier of the synthesized error notification shown when display
/// assembly fails. Never persisted, never forwarded outward.
pub const ERROR_NOTIFICATION_ID: NotificationId = -1;

/// Urgency levels from the notification protocol's `urgency` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    Critical,
}

/// Reasons carried by the `NotificationClosed` signal. Wire values per the
/// desktop notification protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Expired,
    DismissedByUser,
    /// Closed through a `CloseNotification` protocol call.
    ClosedByCall,
    Undefined,
}

impl CloseReason {
    pub fn wire_value(self) -> u32 {
        match self {
            CloseReason::Expired => 1,
            CloseReason::DismissedByUser => 2,
            CloseReason::ClosedByCall => 3,
            CloseReason::Undefined => 4,
        }
    }

    pub fn from_wire(value: u32) -> Self {
        match value {
            1 => CloseReason::Expired,
            2 => CloseReason::DismissedByUser,
            3 => CloseReason::ClosedByCall,
            _ => CloseReason::Undefined,
        }
    }
}

/// A notification as admitted over the protocol.
///
/// This is also the on-disk representation: the bookkeeping that only makes
/// sense within a process (resolved path, creation timestamp, close state)
/// lives on [`CachedNotification`] instead and is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub app_name: String,
    #[serde(default)]
    pub replaces_id: u32,
    #[serde(default)]
    pub app_icon: String,
    pub summary: String,
    #[serde(default)]
    pub body: String,
    /// Ordered (action key, label) pairs.
    #[serde(default)]
    pub actions: Vec<(String, String)>,
    #[serde(default)]
    pub hints: HashMap<String, JsonValue>,
    /// Milliseconds; `-1` requests the server default, `0` never expires.
    #[serde(default = "default_expire_timeout")]
    pub expire_timeout: i32,
    /// Identifier of the daemon run that admitted this notification; part
    /// of the on-disk file name.
    #[serde(default)]
    pub run_id: String,
}

fn default_expire_timeout() -> i32 {
    -1
}

impl Notification {
    pub fn urgency(&self) -> Urgency {
        match self.hints.get("urgency").and_then(JsonValue::as_u64) {
            Some(0) => Urgency::Low,
            Some(2) => Urgency::Critical,
            _ => Urgency::Normal,
        }
    }

    fn bool_hint(&self, key: &str) -> bool {
        self.hints.get(key).and_then(JsonValue::as_bool).unwrap_or(false)
    }

    /// Transient notifications are displayed but never persisted.
    pub fn transient(&self) -> bool {
        self.bool_hint("transient")
    }

    /// Resident notifications are not auto-dismissed when an action fires.
    pub fn resident(&self) -> bool {
        self.bool_hint("resident")
    }

    pub fn suppress_sound(&self) -> bool {
        self.bool_hint("suppress-sound")
    }

    pub fn sound_file(&self) -> Option<&str> {
        self.hints.get("sound-file").and_then(JsonValue::as_str)
    }

    pub fn sound_name(&self) -> Option<&str> {
        self.hints.get("sound-name").and_then(JsonValue::as_str)
    }

    /// Explicit screen position from the `x`/`y` hints, when both are set.
    pub fn position(&self) -> Option<(i32, i32)> {
        let x = self.hints.get("x").and_then(JsonValue::as_i64)?;
        let y = self.hints.get("y").and_then(JsonValue::as_i64)?;
        Some((x as i32, y as i32))
    }
}

/// A notification plus its process-lifetime bookkeeping.
#[derive(Debug, Clone)]
pub struct CachedNotification {
    pub note: Notification,
    /// Resolved storage path under the inbox root.
    pub path: PathBuf,
    pub at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Trashed records stay in memory for the daemon lifetime so in-flight
    /// references remain valid; they are excluded from counts, menus and
    /// deliveries.
    pub trashed: bool,
    pub displayed: bool,
}

impl CachedNotification {
    pub fn new(note: Notification, path: PathBuf, at: DateTime<Utc>) -> Self {
        CachedNotification {
            note,
            path,
            at,
            closed_at: None,
            trashed: false,
            displayed: false,
        }
    }

    /// Folder holding this notification's file.
    pub fn folder(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }
}

/// A notification record shared between the ingestion registry and the
/// folder tree, so close/trash mutations are observed everywhere. The
/// per-record lock is the unit of mutation serialization.
pub type SharedNotification = Arc<RwLock<CachedNotification>>;

pub fn shared(record: CachedNotification) -> SharedNotification {
    Arc::new(RwLock::new(record))
}

/// A node of the in-memory inbox tree, keyed by the absolute path it
/// mirrors. A node exists iff it or a descendant holds cached
/// notifications.
#[derive(Debug, Default)]
pub struct NotificationFolder {
    pub path: PathBuf,
    pub folders: BTreeMap<String, NotificationFolder>,
    pub notifications: BTreeMap<String, SharedNotification>,
}

impl NotificationFolder {
    pub fn new(path: PathBuf) -> Self {
        NotificationFolder {
            path,
            folders: BTreeMap::new(),
            notifications: BTreeMap::new(),
        }
    }

    /// Descends to the node for `relative`, creating intermediate nodes.
    pub fn descend_mut(&mut self, relative: &Path) -> &mut NotificationFolder {
        let mut node = self;
        for part in relative.components() {
            let name = part.as_os_str().to_string_lossy().into_owned();
            let child_path = node.path.join(&name);
            node = node
                .folders
                .entry(name)
                .or_insert_with(|| NotificationFolder::new(child_path));
        }
        node
    }

    /// Finds the existing node for `relative`, if the whole chain exists.
    pub fn find(&self, relative: &Path) -> Option<&NotificationFolder> {
        let mut node = self;
        for part in relative.components() {
            let name = part.as_os_str().to_string_lossy();
            node = node.folders.get(name.as_ref())?;
        }
        Some(node)
    }

    /// Marks every record in this subtree as trashed and returns their ids.
    pub fn mark_subtree_trashed(&self) -> Vec<NotificationId> {
        let mut ids = Vec::new();
        self.collect_trashed(&mut ids);
        ids
    }

    fn collect_trashed(&self, ids: &mut Vec<NotificationId>) {
        for record in self.notifications.values() {
            let mut guard = record.write().unwrap_or_else(|e| e.into_inner());
            if !guard.trashed {
                guard.trashed = true;
                ids.push(guard.note.id);
            }
        }
        for child in self.folders.values() {
            child.collect_trashed(ids);
        }
    }
}
