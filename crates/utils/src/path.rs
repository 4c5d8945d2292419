use std::path::{Path, PathBuf};

const DATA_DIR_NAME: &str = "opencode";
const CONFIG_DIR_NAME: &str = "openchamber";

/// Per-user data root holding worktrees and project metadata.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .unwrap_or_else(std::env::temp_dir)
        .join(DATA_DIR_NAME)
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CONFIG_DIR_NAME)
        .join("config.json")
}

/// Canonical form used when comparing paths for identity. Falls back to the
/// input when the path no longer exists.
pub fn canonicalize_for_compare(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
