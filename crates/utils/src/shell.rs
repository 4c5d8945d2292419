//! Cross-platform shell and executable lookup

use std::path::{Path, PathBuf};

/// Returns the appropriate shell command and argument for the current platform.
///
/// Returns (shell_program, shell_arg) where:
/// - Windows: ("cmd", "/C")
/// - Unix-like: the user's `$SHELL` with "-c", or ("/bin/sh", "-c")
pub fn get_shell_command() -> (String, &'static str) {
    if cfg!(windows) {
        ("cmd".into(), "/C")
    } else {
        (current_unix_shell().to_string_lossy().into_owned(), "-c")
    }
}

/// Resolve an executable by name.
///
/// Absolute paths are accepted as-is when they point at a file, anything else
/// is looked up on the current process PATH.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(|result| result.ok())
}

/// The user's login shell from `$SHELL`, or `/bin/sh` when it is unset or
/// does not point at an absolute file.
pub fn current_unix_shell() -> PathBuf {
    std::env::var_os("SHELL")
        .map(PathBuf::from)
        .filter(|p| usable_shell(p))
        .unwrap_or_else(|| PathBuf::from("/bin/sh"))
}

fn usable_shell(path: &Path) -> bool {
    path.is_absolute() && path.is_file()
}
