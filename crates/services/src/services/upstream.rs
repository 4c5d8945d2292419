use std::path::Path;

use git::{GitService, GitServiceError, RemoteBranchRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTarget {
    pub remote: String,
    pub branch: String,
}

impl From<RemoteBranchRef> for UpstreamTarget {
    fn from(r: RemoteBranchRef) -> Self {
        Self {
            remote: r.remote,
            branch: r.branch,
        }
    }
}

/// Point `local_branch` at `target`. When `remote_url` is given the remote
/// is created or repointed first. If the branch cannot be fetched the
/// tracking keys are written directly so the link survives offline.
pub async fn configure_upstream(
    git: &GitService,
    worktree: &Path,
    local_branch: &str,
    target: &UpstreamTarget,
    remote_url: Option<&str>,
) -> Result<(), GitServiceError> {
    if let Some(url) = remote_url {
        git.ensure_remote(worktree, &target.remote, url).await?;
    }

    match git
        .fetch_remote_branch(worktree, &target.remote, &target.branch)
        .await
    {
        Ok(()) => match git
            .set_upstream(worktree, local_branch, &target.remote, &target.branch)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    branch = local_branch,
                    upstream = %format!("{}/{}", target.remote, target.branch),
                    "Upstream configured"
                );
                return Ok(());
            }
            Err(e) => tracing::debug!("set-upstream failed, writing tracking config: {e}"),
        },
        Err(e) => tracing::warn!(
            remote = %target.remote,
            branch = %target.branch,
            "Upstream fetch failed, writing tracking config: {e}"
        ),
    }

    git.set_config(
        worktree,
        &format!("branch.{local_branch}.remote"),
        &target.remote,
    )
    .await?;
    git.set_config(
        worktree,
        &format!("branch.{local_branch}.merge"),
        &format!("refs/heads/{}", target.branch),
    )
    .await?;
    Ok(())
}
