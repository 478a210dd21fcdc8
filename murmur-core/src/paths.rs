// ABOUTME: XDG Base Directory paths for config, logs and data.
// ABOUTME: Falls back to local directories when the platform has no home directory.

use directories::ProjectDirs;
use std::path::PathBuf;

const QUALIFIER: &str = "dev";
const ORGANIZATION: &str = "murmur";
const APPLICATION: &str = "murmur";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// e.g. ~/.local/share/murmur/, or ./data
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// e.g. ~/.config/murmur/, or the current directory
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &str) -> String {
    let home = || directories::BaseDirs::new().map(|b| b.home_dir().to_path_buf());
    if let Some(stripped) = path.strip_prefix("~/") {
        match home() {
            Some(home) => return home.join(stripped).to_string_lossy().to_string(),
            None => tracing::warn!(path = %path, "Failed to expand tilde: no home directory"),
        }
    } else if path == "~" {
        match home() {
            Some(home) => return home.to_string_lossy().to_string(),
            None => tracing::warn!("Failed to expand tilde: no home directory"),
        }
    }
    path.to_string()
}
