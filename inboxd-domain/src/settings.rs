//! Hierarchical, invalidation-aware per-folder settings.
//!
//! Each folder of the inbox tree may carry a `.settings.json` with three
//! recognized keys: `do_not_disturb_until` and `hide_from_tray_until`
//! (ISO timestamp strings, or `null` for "forever") and
//! `notification_backoff_minutes` (integer, 0 disables batching). A folder
//! resolves each setting to the value held by its nearest ancestor
//! (inclusive) that defines it; absence at every level yields the default.

use crate::error::NotificationError;
use crate::paths::SETTINGS_FILE;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// The two timed suppression windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimedSetting {
    DoNotDisturb,
    HideFromTray,
}

impl TimedSetting {
    /// Key under which the setting is stored in `.settings.json`.
    pub fn key(self) -> &'static str {
        match self {
            TimedSetting::DoNotDisturb => "do_not_disturb_until",
            TimedSetting::HideFromTray => "hide_from_tray_until",
        }
    }
}

/// A resolved timed-setting value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedValue {
    /// Stored as `null`: active until explicitly cleared.
    Forever,
    Until(DateTime<Utc>),
}

impl TimedValue {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self {
            TimedValue::Forever => true,
            TimedValue::Until(t) => *t > now,
        }
    }
}

/// Nearest-ancestor-wins settings caches for the whole inbox tree.
#[derive(Debug)]
pub struct SettingsResolver {
    root: PathBuf,
    do_not_disturb: HashMap<PathBuf, TimedValue>,
    hide_from_tray: HashMap<PathBuf, TimedValue>,
    backoff_minutes: HashMap<PathBuf, i64>,
}

/// Resolver shared between the event loop and the policy engine.
pub type SharedSettings = Arc<tokio::sync::RwLock<SettingsResolver>>;

impl SettingsResolver {
    pub fn new(root: PathBuf) -> Self {
        SettingsResolver {
            root,
            do_not_disturb: HashMap::new(),
            hide_from_tray: HashMap::new(),
            backoff_minutes: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a timed setting for `folder` via the nearest ancestor
    /// (inclusive) that defines it.
    pub fn get(&self, setting: TimedSetting, folder: &Path) -> Option<TimedValue> {
        let cache = match setting {
            TimedSetting::DoNotDisturb => &self.do_not_disturb,
            TimedSetting::HideFromTray => &self.hide_from_tray,
        };
        self.ancestors(folder)
            .find_map(|ancestor| cache.get(ancestor).copied())
    }

    /// True iff the resolved value is the forever sentinel or strictly in
    /// the future.
    pub fn is_active(&self, setting: TimedSetting, folder: &Path) -> bool {
        self.get(setting, folder)
            .map(|value| value.is_active(Utc::now()))
            .unwrap_or(false)
    }

    /// Backoff interval for `folder`, in minutes; 0 when undefined anywhere
    /// up the chain.
    pub fn backoff_minutes(&self, folder: &Path) -> i64 {
        self.ancestors(folder)
            .find_map(|ancestor| self.backoff_minutes.get(ancestor).copied())
            .unwrap_or(0)
    }

    /// Drops the folder's cached entries and re-reads its settings file.
    /// A missing file simply yields no cached entries.
    pub fn invalidate(&mut self, folder: &Path) {
        self.do_not_disturb.remove(folder);
        self.hide_from_tray.remove(folder);
        self.backoff_minutes.remove(folder);
        self.load_folder(folder);
    }

    /// Clears every cache and re-scans the tree for settings files.
    pub fn refresh_all(&mut self) {
        self.do_not_disturb.clear();
        self.hide_from_tray.clear();
        self.backoff_minutes.clear();

        let root = self.root.clone();
        for entry in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
            if entry.file_type().is_file() && entry.file_name() == SETTINGS_FILE {
                if let Some(folder) = entry.path().parent() {
                    let folder = folder.to_path_buf();
                    self.load_folder(&folder);
                }
            }
        }
    }

    /// Merges a timed setting into the folder's settings file and updates
    /// the cache in place.
    pub fn write_datetime_setting(
        &mut self,
        folder: &Path,
        setting: TimedSetting,
        until: TimedValue,
    ) -> Result<(), NotificationError> {
        let settings_file = folder.join(SETTINGS_FILE);
        let mut object: Map<String, JsonValue> = match std::fs::read_to_string(&settings_file) {
            Ok(raw) => serde_json::from_str::<JsonValue>(&raw)
                .ok()
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default(),
            Err(_) => Map::new(),
        };

        let value = match until {
            TimedValue::Forever => JsonValue::Null,
            TimedValue::Until(t) => JsonValue::String(t.to_rfc3339()),
        };
        object.insert(setting.key().to_string(), value);

        let payload = serde_json::to_string_pretty(&JsonValue::Object(object))?;
        std::fs::write(&settings_file, payload).map_err(|source| {
            NotificationError::SettingsWrite {
                path: settings_file.clone(),
                source,
            }
        })?;

        let cache = match setting {
            TimedSetting::DoNotDisturb => &mut self.do_not_disturb,
            TimedSetting::HideFromTray => &mut self.hide_from_tray,
        };
        cache.insert(folder.to_path_buf(), until);
        debug!(?folder, key = setting.key(), "settings file updated");
        Ok(())
    }

    /// Reads one folder's settings file into the caches. Unknown keys are
    /// ignored; a malformed file is logged and yields no entries.
    fn load_folder(&mut self, folder: &Path) {
        let settings_file = folder.join(SETTINGS_FILE);
        let raw = match std::fs::read_to_string(&settings_file) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        let object = match serde_json::from_str::<JsonValue>(&raw) {
            Ok(JsonValue::Object(object)) => object,
            _ => {
                warn!(path = ?settings_file, "settings file is not a JSON object");
                return;
            }
        };

        for (setting, cache) in [
            (TimedSetting::DoNotDisturb, &mut self.do_not_disturb),
            (TimedSetting::HideFromTray, &mut self.hide_from_tray),
        ] {
            match object.get(setting.key()) {
                Some(JsonValue::Null) => {
                    cache.insert(folder.to_path_buf(), TimedValue::Forever);
                }
                Some(JsonValue::String(s)) => match DateTime::parse_from_rfc3339(s) {
                    Ok(t) => {
                        cache.insert(folder.to_path_buf(), TimedValue::Until(t.with_timezone(&Utc)));
                    }
                    Err(e) => warn!(path = ?settings_file, key = setting.key(), %e, "unparsable timestamp"),
                },
                Some(other) => {
                    warn!(path = ?settings_file, key = setting.key(), value = %other, "unexpected value type")
                }
                None => {}
            }
        }

        if let Some(value) = object.get("notification_backoff_minutes") {
            match value.as_i64() {
                Some(minutes) => {
                    self.backoff_minutes.insert(folder.to_path_buf(), minutes);
                }
                None => {
                    warn!(path = ?settings_file, value = %value, "notification_backoff_minutes is not an integer")
                }
            }
        }
    }

    /// Folder, then each parent, up to and including the root. A folder
    /// outside the root yields only itself.
    fn ancestors<'a>(&'a self, folder: &'a Path) -> impl Iterator<Item = &'a Path> {
        let root = self.root.as_path();
        folder
            .ancestors()
            .take_while(move |p| p.starts_with(root))
            .chain(
                // Fallback for paths outside the tree: resolve against the
                // folder itself only.
                std::iter::once(folder).filter(move |p| !p.starts_with(root)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn write_settings(folder: &Path, value: JsonValue) {
        std::fs::create_dir_all(folder).unwrap();
        std::fs::write(folder.join(SETTINGS_FILE), value.to_string()).unwrap();
    }

    #[test]
    fn nearest_ancestor_wins() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let parent = root.join("mailer");
        let child = parent.join("new-mail");
        std::fs::create_dir_all(&child).unwrap();

        let future = Utc::now() + Duration::hours(1);
        write_settings(&root, json!({ "do_not_disturb_until": future.to_rfc3339() }));
        write_settings(&parent, json!({ "do_not_disturb_until": null }));

        let mut resolver = SettingsResolver::new(root.clone());
        resolver.refresh_all();

        // The child inherits from the nearest definer: its parent.
        assert_eq!(
            resolver.get(TimedSetting::DoNotDisturb, &child),
            Some(TimedValue::Forever)
        );
        // The parent's own entry also shadows the root for itself.
        assert_eq!(
            resolver.get(TimedSetting::DoNotDisturb, &parent),
            Some(TimedValue::Forever)
        );
        // A sibling without an entry falls through to the root.
        let sibling = root.join("chat");
        assert!(matches!(
            resolver.get(TimedSetting::DoNotDisturb, &sibling),
            Some(TimedValue::Until(_))
        ));
    }

    #[test]
    fn undefined_everywhere_is_inactive_and_zero_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = SettingsResolver::new(dir.path().to_path_buf());
        let folder = dir.path().join("anything");
        assert_eq!(resolver.get(TimedSetting::DoNotDisturb, &folder), None);
        assert!(!resolver.is_active(TimedSetting::DoNotDisturb, &folder));
        assert_eq!(resolver.backoff_minutes(&folder), 0);
    }

    #[test]
    fn forever_and_future_are_active_past_is_not() {
        let now = Utc::now();
        assert!(TimedValue::Forever.is_active(now));
        assert!(TimedValue::Until(now + Duration::minutes(5)).is_active(now));
        assert!(!TimedValue::Until(now - Duration::minutes(5)).is_active(now));
    }

    #[test]
    fn invalidate_drops_and_rereads() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("mailer");
        write_settings(&folder, json!({ "notification_backoff_minutes": 15 }));

        let mut resolver = SettingsResolver::new(dir.path().to_path_buf());
        resolver.refresh_all();
        assert_eq!(resolver.backoff_minutes(&folder), 15);

        write_settings(&folder, json!({ "notification_backoff_minutes": 30 }));
        resolver.invalidate(&folder);
        assert_eq!(resolver.backoff_minutes(&folder), 30);

        // Removing the file leaves no entry at all.
        std::fs::remove_file(folder.join(SETTINGS_FILE)).unwrap();
        resolver.invalidate(&folder);
        assert_eq!(resolver.backoff_minutes(&folder), 0);
    }

    #[test]
    fn hide_from_tray_is_independent_of_dnd() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("mailer");
        write_settings(&folder, json!({ "hide_from_tray_until": null }));

        let mut resolver = SettingsResolver::new(dir.path().to_path_buf());
        resolver.refresh_all();
        assert!(resolver.is_active(TimedSetting::HideFromTray, &folder));
        assert!(!resolver.is_active(TimedSetting::DoNotDisturb, &folder));
    }

    #[test]
    fn write_datetime_setting_merges_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("mailer");
        write_settings(&folder, json!({ "notification_backoff_minutes": 5 }));

        let mut resolver = SettingsResolver::new(dir.path().to_path_buf());
        resolver.refresh_all();

        let until = Utc::now() + Duration::hours(8);
        resolver
            .write_datetime_setting(&folder, TimedSetting::DoNotDisturb, TimedValue::Until(until))
            .unwrap();

        assert!(resolver.is_active(TimedSetting::DoNotDisturb, &folder));

        // The pre-existing key survived the merge.
        let raw = std::fs::read_to_string(folder.join(SETTINGS_FILE)).unwrap();
        let parsed: JsonValue = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["notification_backoff_minutes"], json!(5));
        assert!(parsed["do_not_disturb_until"].is_string());
    }

    #[test]
    fn malformed_file_yields_no_entries() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("mailer");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join(SETTINGS_FILE), "not json at all").unwrap();

        let mut resolver = SettingsResolver::new(dir.path().to_path_buf());
        resolver.refresh_all();
        assert_eq!(resolver.get(TimedSetting::DoNotDisturb, &folder), None);
        assert_eq!(resolver.backoff_minutes(&folder), 0);
    }
}
