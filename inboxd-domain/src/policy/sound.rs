//! Notification sound resolution.
//!
//! Precedence, highest first: explicit `sound-file` hint, `sound-name` hint
//! mapped into the configured sound theme, nearest ancestor folder's
//! `.notification.wav` marker, silence. The `suppress-sound` hint skips
//! resolution entirely.

use crate::paths::SOUND_FILE;
use crate::types::Notification;
use std::path::{Path, PathBuf};

pub fn resolve_sound(
    root: &Path,
    theme_dir: &Path,
    note: &Notification,
    folder: &Path,
) -> Option<PathBuf> {
    if note.suppress_sound() {
        return None;
    }
    if let Some(file) = note.sound_file() {
        return Some(PathBuf::from(file));
    }
    if let Some(name) = note.sound_name() {
        return Some(theme_dir.join(format!("{name}.oga")));
    }

    let mut current = folder;
    loop {
        let marker = current.join(SOUND_FILE);
        if marker.exists() {
            return Some(marker);
        }
        if current == root {
            break;
        }
        match current.parent() {
            Some(parent) if parent.starts_with(root) => current = parent,
            _ => break,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NotificationId;
    use serde_json::json;
    use std::collections::HashMap;

    fn note(id: NotificationId) -> Notification {
        Notification {
            id,
            app_name: "app".into(),
            replaces_id: 0,
            app_icon: String::new(),
            summary: "s".into(),
            body: String::new(),
            actions: vec![],
            hints: HashMap::new(),
            expire_timeout: -1,
            run_id: "r".into(),
        }
    }

    #[test]
    fn suppress_sound_wins_over_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut n = note(1);
        n.hints.insert("suppress-sound".into(), json!(true));
        n.hints.insert("sound-file".into(), json!("/tmp/ding.wav"));
        assert_eq!(
            resolve_sound(dir.path(), Path::new("/theme"), &n, dir.path()),
            None
        );
    }

    #[test]
    fn sound_file_beats_sound_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut n = note(1);
        n.hints.insert("sound-file".into(), json!("/tmp/ding.wav"));
        n.hints.insert("sound-name".into(), json!("message-new-instant"));
        assert_eq!(
            resolve_sound(dir.path(), Path::new("/theme"), &n, dir.path()),
            Some(PathBuf::from("/tmp/ding.wav"))
        );
    }

    #[test]
    fn sound_name_maps_into_theme() {
        let dir = tempfile::tempdir().unwrap();
        let mut n = note(1);
        n.hints.insert("sound-name".into(), json!("dialog-error"));
        assert_eq!(
            resolve_sound(dir.path(), Path::new("/theme"), &n, dir.path()),
            Some(PathBuf::from("/theme/dialog-error.oga"))
        );
    }

    #[test]
    fn ancestor_marker_found_by_nearest_walk() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("mailer");
        let child = parent.join("new-mail");
        std::fs::create_dir_all(&child).unwrap();
        std::fs::write(parent.join(SOUND_FILE), b"riff").unwrap();

        assert_eq!(
            resolve_sound(dir.path(), Path::new("/theme"), &note(1), &child),
            Some(parent.join(SOUND_FILE))
        );
    }

    #[test]
    fn silence_when_nothing_defined() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_sound(dir.path(), Path::new("/theme"), &note(1), dir.path()),
            None
        );
    }
}
