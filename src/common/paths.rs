//! Configuration and working-directory paths

use std::io;
use std::path::{Path, PathBuf};

/// Name used for the configuration directory
const APP_NAME: &str = "functest";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/functest/`
/// - macOS: `~/Library/Application Support/functest/`
/// - Windows: `%APPDATA%\functest\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Remove and re-create a scratch directory so it is empty
pub fn recreate_dir(dir: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(dir = %dir.display(), "Could not clear directory: {}", e),
    }
    std::fs::create_dir_all(dir)
}

/// Names of files in `dir` ending with one of `extensions`, sorted
///
/// Files starting with `_` are helpers, not tests, and are skipped.
pub fn find_files(dir: &Path, extensions: &[String]) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('_') {
            continue;
        }
        if extensions.iter().any(|ext| name.ends_with(ext.as_str())) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
