//! Storage-path computation for incoming notifications.
//!
//! The default location is `root/<slug(app_name)>/<slug(summary)>`. Any
//! ancestor folder of that location may redirect notifications below itself
//! through a declarative `subdir_rule` in its settings file: a list of
//! template segments rendered from notification fields. Rules are data, not
//! code; a rule that is malformed or escapes its folder is a logged
//! configuration error and never fatal.

use crate::types::Notification;
use inboxd_core::utils::slug::slugify;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Per-folder settings file. Also read by the settings resolver.
pub const SETTINGS_FILE: &str = ".settings.json";
/// Per-folder custom-sound marker.
pub const SOUND_FILE: &str = ".notification.wav";

const MAX_FILENAME_LENGTH: usize = 255;
const MAX_FILEPATH_LENGTH: usize = 4096;
const SUFFIX: &str = ".json";

/// True for the hidden marker files that trash and the startup scan must
/// never treat as notification records.
pub fn is_protected_file(name: &str) -> bool {
    name == SETTINGS_FILE || name == SOUND_FILE
}

/// Computes the full storage path for a notification, including the
/// run-scoped, length-bounded file name.
pub fn output_path(root: &Path, note: &Notification) -> PathBuf {
    let default_outdir = root
        .join(slugify(&note.app_name))
        .join(slugify(&note.summary));
    let outdir = custom_output_dir(root, &default_outdir, note);

    let mut name = format!("{}-{}", note.run_id, note.id);
    if name.len() > MAX_FILENAME_LENGTH - SUFFIX.len() {
        name.truncate(MAX_FILENAME_LENGTH - SUFFIX.len());
    }

    let mut path = outdir.join(format!("{name}{SUFFIX}"));
    let path_str = path.to_string_lossy();
    if path_str.len() > MAX_FILEPATH_LENGTH - SUFFIX.len() {
        let mut truncated: String = path_str.chars().collect();
        truncated.truncate(MAX_FILEPATH_LENGTH - SUFFIX.len());
        truncated.push_str(SUFFIX);
        path = PathBuf::from(truncated);
    }
    path
}

/// Walks the default directory's ancestor chain root-first and applies the
/// first folder's `subdir_rule` that yields a redirect. A rule result must
/// stay strictly below the folder that defined it.
fn custom_output_dir(root: &Path, default_outdir: &Path, note: &Notification) -> PathBuf {
    let mut chain: Vec<&Path> = default_outdir
        .ancestors()
        .take_while(|p| p.starts_with(root))
        .collect();
    chain.reverse();

    for folder in chain {
        let settings_file = folder.join(SETTINGS_FILE);
        let Some(rule) = read_subdir_rule(&settings_file) else {
            continue;
        };

        match apply_rule(&rule, folder, note) {
            RuleOutcome::Redirect(outdir) => {
                debug!(?outdir, "using custom subdir");
                return outdir;
            }
            RuleOutcome::NoRedirect => continue,
            RuleOutcome::Invalid(message) => {
                error!(path = ?settings_file, %message, "invalid subdir_rule");
                return default_outdir.to_path_buf();
            }
        }
    }
    default_outdir.to_path_buf()
}

fn read_subdir_rule(settings_file: &Path) -> Option<JsonValue> {
    let raw = std::fs::read_to_string(settings_file).ok()?;
    let parsed: JsonValue = serde_json::from_str(&raw).ok()?;
    parsed.get("subdir_rule").cloned()
}

enum RuleOutcome {
    Redirect(PathBuf),
    NoRedirect,
    Invalid(String),
}

fn apply_rule(rule: &JsonValue, folder: &Path, note: &Notification) -> RuleOutcome {
    let JsonValue::Array(segments) = rule else {
        return RuleOutcome::Invalid(format!("expected a list of strings, got {rule}"));
    };
    if segments.is_empty() {
        return RuleOutcome::NoRedirect;
    }

    let mut parts = Vec::new();
    for segment in segments {
        let JsonValue::String(template) = segment else {
            return RuleOutcome::Invalid(format!("expected a list of strings, got {segment}"));
        };
        let rendered = match render_segment(template, note) {
            Ok(rendered) => rendered,
            Err(message) => return RuleOutcome::Invalid(message),
        };
        let part = slugify(&rendered);
        if !rendered.trim().is_empty() {
            parts.push(part);
        }
    }
    if parts.is_empty() {
        return RuleOutcome::NoRedirect;
    }

    let outdir: PathBuf = parts.iter().fold(folder.to_path_buf(), |dir, p| dir.join(p));
    if outdir.starts_with(folder) && outdir != folder {
        RuleOutcome::Redirect(outdir)
    } else {
        RuleOutcome::Invalid(format!(
            "subdir must be below {}, got {}",
            folder.display(),
            outdir.display()
        ))
    }
}

/// Renders one template segment. Recognized placeholders: `{app_name}`,
/// `{summary}`, `{body}`, `{id}`, `{hint:<key>}` (string/number/bool hints).
fn render_segment(template: &str, note: &Notification) -> Result<String, String> {
    let mut out = String::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            return Err(format!("unterminated placeholder in {template:?}"));
        };
        let field = &after[..close];
        let value = match field {
            "app_name" => note.app_name.clone(),
            "summary" => note.summary.clone(),
            "body" => note.body.clone(),
            "id" => note.id.to_string(),
            _ => match field.strip_prefix("hint:") {
                Some(key) => match note.hints.get(key) {
                    Some(JsonValue::String(s)) => s.clone(),
                    Some(JsonValue::Number(n)) => n.to_string(),
                    Some(JsonValue::Bool(b)) => b.to_string(),
                    Some(_) | None => String::new(),
                },
                None => return Err(format!("unknown placeholder {{{field}}}")),
            },
        };
        out.push_str(&value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
