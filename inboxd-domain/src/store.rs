//! The persistent notification store.
//!
//! An in-memory tree mirrors the inbox directory hierarchy and holds every
//! cached notification record. The store owns all tree mutations: the
//! startup scan, insertion of freshly admitted notifications, and the
//! cascading trash operation that runs on background tasks while the event
//! loop stays live.

use crate::collaborators::TrashSink;
use crate::error::NotificationError;
use crate::events::{EventBus, NotificationEvent};
use crate::paths::{is_protected_file, SETTINGS_FILE, SOUND_FILE};
use crate::settings::{SettingsResolver, TimedSetting};
use crate::types::{
    shared, CachedNotification, Notification, NotificationFolder, SharedNotification,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Clone)]
pub struct NotificationStore {
    root: PathBuf,
    tree: Arc<RwLock<NotificationFolder>>,
    trash_sink: Arc<dyn TrashSink>,
    events: EventBus,
}

impl NotificationStore {
    pub fn new(root: PathBuf, trash_sink: Arc<dyn TrashSink>, events: EventBus) -> Self {
        let tree = NotificationFolder::new(root.clone());
        NotificationStore {
            root,
            tree: Arc::new(RwLock::new(tree)),
            trash_sink,
            events,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scans the inbox tree and loads every persisted notification,
    /// building folder nodes as paths are encountered. The file's
    /// modification time becomes the record's creation timestamp. Returns
    /// the number of records loaded; unreadable files are logged and
    /// skipped.
    pub async fn load_existing(&self) -> usize {
        let mut loaded = 0;
        let mut tree = self.tree.write().await;
        for entry in WalkDir::new(&self.root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") || is_protected_file(&name) {
                continue;
            }
            let path = entry.path();
            match self.load_record(path) {
                Ok(record) => {
                    let parent = path.parent().unwrap_or(&self.root);
                    let relative = parent.strip_prefix(&self.root).unwrap_or(Path::new(""));
                    tree.descend_mut(relative)
                        .notifications
                        .insert(name, shared(record));
                    loaded += 1;
                }
                Err(e) => warn!(?path, error = %e, "skipping unreadable notification file"),
            }
        }
        info!(loaded, root = ?self.root, "cached existing notifications");
        self.events.publish(NotificationEvent::CacheUpdated);
        loaded
    }

    fn load_record(&self, path: &Path) -> Result<CachedNotification, NotificationError> {
        let raw = std::fs::read_to_string(path).map_err(|source| NotificationError::Persist {
            path: path.to_path_buf(),
            source,
        })?;
        let note: Notification = serde_json::from_str(&raw)?;
        let at = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(CachedNotification::new(note, path.to_path_buf(), at))
    }

    /// Persists a notification and inserts it into the tree. Transient
    /// notifications skip the disk write but are still cached in memory.
    /// Idempotent by file name; write failures propagate to the caller.
    pub async fn cache(&self, record: &SharedNotification) -> Result<(), NotificationError> {
        let snapshot = record.read().unwrap_or_else(|e| e.into_inner()).clone();

        if !snapshot.note.transient() {
            let parent = snapshot.folder().to_path_buf();
            tokio::fs::create_dir_all(&parent)
                .await
                .map_err(|source| NotificationError::Persist {
                    path: parent.clone(),
                    source,
                })?;
            let payload = serde_json::to_vec(&snapshot.note)?;
            tokio::fs::write(&snapshot.path, payload).await.map_err(|source| {
                NotificationError::Persist {
                    path: snapshot.path.clone(),
                    source,
                }
            })?;
            info!(summary = %snapshot.note.summary, path = ?snapshot.path, "notification written");
        }

        let relative = snapshot
            .folder()
            .strip_prefix(&self.root)
            .unwrap_or(Path::new(""))
            .to_path_buf();
        let name = snapshot
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut tree = self.tree.write().await;
        tree.descend_mut(&relative)
            .notifications
            .insert(name, record.clone());
        drop(tree);

        self.events.publish(NotificationEvent::CacheUpdated);
        Ok(())
    }

    /// Starts a cascading trash operation without blocking the caller.
    pub fn trash_in_background(&self, path: PathBuf) {
        tokio::spawn(trash_task(self.clone(), path));
    }

    /// Cascading trash:
    ///
    /// - a notification file is handed to the trash collaborator, then its
    ///   record is marked trashed;
    /// - a directory with no protected marker files anywhere below it is
    ///   trashed whole and its subtree marked;
    /// - a directory that does contain markers is kept, and the operation
    ///   recurses concurrently into child folders and direct notification
    ///   files, preserving settings/sound files that apply to siblings.
    ///
    /// Failures are logged per path and never abort sibling operations.
    pub async fn trash(&self, path: PathBuf) {
        if !path.exists() {
            debug!(?path, "path does not exist, skipping trash");
            return;
        }

        if path.is_file() {
            self.trash_file(&path).await;
        } else {
            self.trash_directory(&path).await;
        }
        self.events.publish(NotificationEvent::CacheUpdated);
    }

    async fn trash_file(&self, path: &Path) {
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => return,
        };
        if !name.ends_with(".json") || is_protected_file(&name) {
            return;
        }
        if let Err(e) = self.trash_sink.trash(path).await {
            error!(?path, error = %e, "failed to trash notification file");
            return;
        }

        let relative = path
            .parent()
            .and_then(|p| p.strip_prefix(&self.root).ok())
            .unwrap_or(Path::new(""));
        let tree = self.tree.read().await;
        if let Some(record) = tree.find(relative).and_then(|node| node.notifications.get(&name)) {
            let id = {
                let mut guard = record.write().unwrap_or_else(|e| e.into_inner());
                guard.trashed = true;
                guard.note.id
            };
            self.events.publish(NotificationEvent::Trashed { id });
        }
    }

    async fn trash_directory(&self, path: &Path) {
        let scan_path = path.to_path_buf();
        let has_markers = tokio::task::spawn_blocking(move || subtree_has_markers(&scan_path))
            .await
            .unwrap_or(true);

        if !has_markers {
            if let Err(e) = self.trash_sink.trash(path).await {
                error!(?path, error = %e, "failed to trash directory");
                return;
            }
            let relative = path.strip_prefix(&self.root).unwrap_or(Path::new(""));
            let tree = self.tree.read().await;
            if let Some(node) = tree.find(relative) {
                for id in node.mark_subtree_trashed() {
                    self.events.publish(NotificationEvent::Trashed { id });
                }
            }
            return;
        }

        // Protected markers below: keep this directory, clear what can go.
        let relative = path.strip_prefix(&self.root).unwrap_or(Path::new(""));
        let mut children = Vec::new();
        {
            let tree = self.tree.read().await;
            if let Some(node) = tree.find(relative) {
                for folder in node.folders.values() {
                    children.push(folder.path.clone());
                }
                for name in node.notifications.keys() {
                    children.push(path.join(name));
                }
            }
        }

        let mut tasks = JoinSet::new();
        for child in children {
            tasks.spawn(trash_task(self.clone(), child));
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Every folder of the tree in preorder, with its records. Used by the
    /// batch pass.
    pub async fn folders_with_records(&self) -> Vec<(PathBuf, Vec<SharedNotification>)> {
        let tree = self.tree.read().await;
        let mut out = Vec::new();
        collect_folders(&tree, &mut out);
        out
    }

    /// Count of non-trashed notifications visible to the tray: folders with
    /// an active do-not-disturb or hide-from-tray window contribute
    /// nothing, and records still inside their backoff window are pending
    /// batch delivery rather than visible.
    pub async fn visible_count(&self, resolver: &SettingsResolver) -> usize {
        let tree = self.tree.read().await;
        count_folder(&tree, resolver, Utc::now())
    }
}

fn trash_task(
    store: NotificationStore,
    path: PathBuf,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move { store.trash(path).await })
}

fn collect_folders(node: &NotificationFolder, out: &mut Vec<(PathBuf, Vec<SharedNotification>)>) {
    out.push((node.path.clone(), node.notifications.values().cloned().collect()));
    for child in node.folders.values() {
        collect_folders(child, out);
    }
}

fn count_folder(node: &NotificationFolder, resolver: &SettingsResolver, now: DateTime<Utc>) -> usize {
    if resolver.is_active(TimedSetting::DoNotDisturb, &node.path)
        || resolver.is_active(TimedSetting::HideFromTray, &node.path)
    {
        return 0;
    }

    let backoff = resolver.backoff_minutes(&node.path);
    let mut count = 0;
    for record in node.notifications.values() {
        let guard = record.read().unwrap_or_else(|e| e.into_inner());
        if guard.trashed {
            continue;
        }
        if backoff <= 0 || (now - guard.at).num_minutes() > backoff {
            count += 1;
        }
    }
    count + node
        .folders
        .values()
        .map(|child| count_folder(child, resolver, now))
        .sum::<usize>()
}

/// True when the subtree holds a settings or sound marker file anywhere.
fn subtree_has_markers(path: &Path) -> bool {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| {
            entry.file_type().is_file()
                && (entry.file_name() == SETTINGS_FILE || entry.file_name() == SOUND_FILE)
        })
}
