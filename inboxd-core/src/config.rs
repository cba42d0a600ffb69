//! Daemon configuration.
//!
//! Configuration is read from `inboxd.toml` in the XDG config directory
//! (or an explicit path), deserialized with serde and validated before use.
//! Every field has a default so an absent file yields a working daemon.

use crate::error::{ConfigError, CoreError};
use directories_next::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Root of the notification inbox tree. May be overridden by the first
    /// CLI argument; must be set through one of the two.
    pub root_path: Option<PathBuf>,
    /// Interval between periodic passes (settings refresh, tray refresh,
    /// batch delivery), in seconds.
    pub tick_interval_secs: u64,
    /// Expiry applied to display units that request the protocol default
    /// (`expire_timeout = -1`), in milliseconds.
    pub default_timeout_ms: u32,
    pub logging: LoggingConfig,
    pub popup: PopupConfig,
    /// Directory searched for themed sounds referenced by the `sound-name`
    /// hint.
    pub sound_theme_dir: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    pub level: String,
    /// Optional log file; enables a daily-rolling file layer.
    pub file: Option<PathBuf>,
}

/// Popup geometry used by the display-stack placement math.
///
/// Rendering itself happens outside the daemon; these dimensions drive the
/// stacking contract (bottom-right anchor, fixed gap).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PopupConfig {
    pub width: u32,
    pub height: u32,
    /// Available screen geometry reported to the policy engine when no
    /// windowing substrate provides one.
    pub screen_width: u32,
    pub screen_height: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            root_path: None,
            tick_interval_secs: 60,
            default_timeout_ms: 5000,
            logging: LoggingConfig::default(),
            popup: PopupConfig::default(),
            sound_theme_dir: PathBuf::from("/usr/share/sounds/freedesktop/stereo"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Default for PopupConfig {
    fn default() -> Self {
        PopupConfig {
            width: 256,
            height: 96,
            screen_width: 1920,
            screen_height: 1080,
        }
    }
}

impl DaemonConfig {
    /// Loads the configuration from the default XDG location.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load() -> Result<Self, CoreError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Loads and validates the configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: DaemonConfig = toml::from_str(&raw).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges after parsing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tick_interval_secs must be positive".to_string(),
            ));
        }
        if self.popup.width == 0 || self.popup.height == 0 {
            return Err(ConfigError::ValidationError(
                "popup dimensions must be positive".to_string(),
            ));
        }
        if self.popup.screen_width == 0 || self.popup.screen_height == 0 {
            return Err(ConfigError::ValidationError(
                "screen dimensions must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/inboxd/inboxd.toml`, when a home directory exists.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "github", "inboxd")
        .map(|dirs| dirs.config_dir().join("inboxd.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval_secs, 60);
        assert_eq!(config.default_timeout_ms, 5000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn load_from_parses_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inboxd.toml");
        std::fs::write(
            &path,
            r#"
root_path = "/tmp/inbox"
tick_interval_secs = 30

[popup]
height = 128
"#,
        )
        .unwrap();

        let config = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(config.root_path, Some(PathBuf::from("/tmp/inbox")));
        assert_eq!(config.tick_interval_secs, 30);
        // Unspecified fields keep their defaults.
        assert_eq!(config.popup.width, 256);
        assert_eq!(config.popup.height, 128);
        assert_eq!(config.default_timeout_ms, 5000);
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inboxd.toml");
        std::fs::write(&path, "tick_interval_secs = 0\n").unwrap();

        let err = DaemonConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("tick_interval_secs"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inboxd.toml");
        std::fs::write(&path, "this is not toml").unwrap();

        assert!(matches!(
            DaemonConfig::load_from(&path),
            Err(CoreError::Config(ConfigError::ParseError(_)))
        ));
    }
}
