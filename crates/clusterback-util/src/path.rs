//! Path utilities.
//!
//! Standard locations for clusterback configuration and state.

use std::path::PathBuf;

/// Get the clusterback configuration directory.
///
/// On Unix, prefers `~/.config/clusterback` when it exists (common for CLI
/// tools), otherwise the platform configuration directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(unix)]
    {
        if let Some(home) = dirs::home_dir() {
            let xdg_config = home.join(".config").join("clusterback");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }
    }

    dirs::config_dir().map(|p| p.join("clusterback"))
}

/// Get the clusterback data directory.
///
/// This follows XDG conventions:
/// - `$XDG_DATA_HOME/clusterback` if set
/// - `~/.local/share/clusterback` otherwise
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("clusterback"))
}

/// Get the clusterback state directory (logs, runtime state).
pub fn state_dir() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|p| p.join("clusterback"))
}

/// Default location of the version store.
pub fn default_store_dir() -> PathBuf {
    data_dir()
        .map(|p| p.join("snapshots"))
        .unwrap_or_else(|| PathBuf::from(".clusterback/snapshots"))
}
