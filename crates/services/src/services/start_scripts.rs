//! Commands run in a freshly created worktree, after creation has returned.
use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    sync::Arc,
};

use git::GitCli;
use tokio::task::JoinHandle;
use utils::shell::get_shell_command;

use super::project::ProjectStore;

/// Queue the project's stored start command, then `extra`. Failures are logged only.
pub fn spawn_start_scripts(
    cli: GitCli,
    store: Arc<dyn ProjectStore>,
    project_id: String,
    worktree: PathBuf,
    extra: Option<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stored = match store.start_command(&project_id).await {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(project = %project_id, "Failed to load start command: {e}");
                None
            }
        };
        for command in stored
            .into_iter()
            .chain(extra)
            .filter(|c| !c.trim().is_empty())
        {
            run_start_command(&cli, &worktree, &command).await;
        }
    })
}

/// Run one command through the platform shell inside `dir`.
pub async fn run_start_command(cli: &GitCli, dir: &Path, command: &str) -> bool {
    let (shell, flag) = get_shell_command();
    let envs = cli.environment().await;
    let args = [OsString::from(flag), OsString::from(command)];
    let out = cli
        .executor()
        .run(OsStr::new(&shell), &args, Some(dir), &envs)
        .await;
    if out.success() {
        tracing::info!(worktree = ?dir, command, "Start script finished");
        true
    } else {
        tracing::warn!(
            worktree = ?dir,
            command,
            "Start script failed: {}",
            out.failure_message()
        );
        false
    }
}
