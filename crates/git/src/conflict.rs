//! Merge, rebase, and stash-pop with conflict detection.
//!
//! A command that stops on conflicts is not an error here: the caller gets
//! an [`OperationOutcome`] naming the unmerged paths so the IDE can show a
//! resolution view. Any other failure is raised with git's stderr.
use std::{ffi::OsString, path::Path};

use serde::Serialize;

use crate::{
    GitService, GitServiceError, ensure_not_option,
    parse::{conflict_files, contains_any_phrase},
};

const START_CONFLICT_PHRASES: &[&str] = &["conflict", "could not apply", "automatic merge failed"];
const CONTINUE_CONFLICT_PHRASES: &[&str] = &["conflict", "needs merge", "unmerged"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub conflict: bool,
    pub conflict_files: Vec<String>,
    pub message: Option<String>,
}

impl OperationOutcome {
    fn completed() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }
}

impl GitService {
    pub async fn merge(&self, dir: &Path, branch: &str) -> Result<OperationOutcome, GitServiceError> {
        ensure_not_option(branch, "branch")?;
        self.conflict_aware("merge", dir, &["merge", branch], &[], START_CONFLICT_PHRASES)
            .await
    }

    pub async fn rebase(&self, dir: &Path, onto: &str) -> Result<OperationOutcome, GitServiceError> {
        ensure_not_option(onto, "branch")?;
        self.conflict_aware("rebase", dir, &["rebase", onto], &[], START_CONFLICT_PHRASES)
            .await
    }

    pub async fn continue_rebase(&self, dir: &Path) -> Result<OperationOutcome, GitServiceError> {
        self.conflict_aware(
            "rebase --continue",
            dir,
            &["-c", "core.editor=true", "rebase", "--continue"],
            &non_interactive_editor(),
            CONTINUE_CONFLICT_PHRASES,
        )
        .await
    }

    /// Conclude a merge whose conflicts have been resolved and staged.
    pub async fn continue_merge(&self, dir: &Path) -> Result<OperationOutcome, GitServiceError> {
        self.conflict_aware(
            "merge --continue",
            dir,
            &["commit", "--no-edit"],
            &non_interactive_editor(),
            CONTINUE_CONFLICT_PHRASES,
        )
        .await
    }

    pub async fn abort_merge(&self, dir: &Path) -> Result<OperationOutcome, GitServiceError> {
        Ok(self.abort(dir, "merge").await)
    }

    pub async fn abort_rebase(&self, dir: &Path) -> Result<OperationOutcome, GitServiceError> {
        Ok(self.abort(dir, "rebase").await)
    }

    pub async fn stash_pop(&self, dir: &Path) -> Result<OperationOutcome, GitServiceError> {
        self.conflict_aware("stash pop", dir, &["stash", "pop"], &[], START_CONFLICT_PHRASES)
            .await
    }

    async fn abort(&self, dir: &Path, command: &str) -> OperationOutcome {
        let out = self.cli.run(dir, [command, "--abort"]).await;
        if out.success() {
            tracing::info!(repo = ?dir, "{command} aborted");
            OperationOutcome::completed()
        } else {
            OperationOutcome {
                message: Some(out.failure_message()),
                ..Default::default()
            }
        }
    }

    async fn conflict_aware(
        &self,
        operation: &'static str,
        dir: &Path,
        args: &[&str],
        envs: &[(OsString, OsString)],
        phrases: &[&str],
    ) -> Result<OperationOutcome, GitServiceError> {
        let out = self.cli.run_with_env(dir, args, envs).await;
        if out.success() {
            return Ok(OperationOutcome::completed());
        }
        if !contains_any_phrase(&out.combined(), phrases) {
            let stderr = out.stderr.trim();
            return Err(GitServiceError::OperationFailed {
                operation,
                stderr: if stderr.is_empty() {
                    out.failure_message()
                } else {
                    stderr.to_string()
                },
            });
        }

        let status = self.cli.run(dir, ["status", "--porcelain"]).await;
        let files = conflict_files(&status.stdout);
        tracing::info!(repo = ?dir, operation, files = files.len(), "Stopped on conflicts");
        Ok(OperationOutcome {
            success: false,
            conflict: true,
            conflict_files: files,
            message: Some(out.failure_message()),
        })
    }
}

fn non_interactive_editor() -> Vec<(OsString, OsString)> {
    vec![("GIT_EDITOR".into(), "true".into())]
}
