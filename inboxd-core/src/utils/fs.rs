//! Filesystem helpers.

use crate::error::CoreError;
use std::fs;
use std::path::Path;

/// Ensures that a directory exists at the given path.
///
/// Creates the directory (and any missing parents) when absent. Fails when
/// the path exists but is not a directory.
pub fn ensure_dir_exists(path: &Path) -> Result<(), CoreError> {
    if path.exists() {
        if !path.is_dir() {
            return Err(CoreError::Filesystem {
                message: "path exists but is not a directory".to_string(),
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "path exists but is not a directory",
                ),
            });
        }
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|source| CoreError::Filesystem {
        message: "failed to create directory".to_string(),
        path: path.to_path_buf(),
        source,
    })
}
