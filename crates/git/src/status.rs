//! Working tree status and branch listing.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    AdapterBranch, GitService, GitServiceError, RepositorySnapshot,
    parse::{self, StatusFile},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeInProgress {
    pub head: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebaseInProgress {
    pub head_name: Option<String>,
    pub onto: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusResult {
    pub current: Option<String>,
    pub tracking: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub files: Vec<StatusFile>,
    pub is_clean: bool,
    pub merge_in_progress: Option<MergeInProgress>,
    pub rebase_in_progress: Option<RebaseInProgress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub current: bool,
    pub commit: String,
    pub label: String,
    pub tracking: Option<String>,
    pub ahead: Option<u32>,
    pub behind: Option<u32>,
    pub is_remote: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BranchSummary {
    pub all: Vec<String>,
    pub current: Option<String>,
    pub branches: BTreeMap<String, BranchInfo>,
}

impl StatusResult {
    fn from_snapshot(snapshot: RepositorySnapshot) -> Self {
        let mut files: BTreeMap<String, (char, char)> = BTreeMap::new();
        for change in snapshot.index_changes {
            files.entry(change.path).or_insert((' ', ' ')).0 = change.status.code();
        }
        for change in snapshot.working_tree_changes {
            let code = change.status.code();
            let entry = files.entry(change.path).or_insert((' ', ' '));
            if matches!(code, '?' | '!') {
                *entry = (code, code);
            } else {
                entry.1 = code;
            }
        }
        for change in snapshot.merge_changes {
            let code = change.status.code();
            files.insert(change.path, (code, code));
        }

        let files: Vec<StatusFile> = files
            .into_iter()
            .map(|(path, (index, working_dir))| StatusFile {
                path,
                index,
                working_dir,
            })
            .collect();
        Self {
            current: snapshot.head,
            tracking: snapshot.upstream,
            ahead: snapshot.ahead,
            behind: snapshot.behind,
            is_clean: files.is_empty(),
            files,
            merge_in_progress: None,
            rebase_in_progress: None,
        }
    }

    fn from_porcelain(status: parse::PorcelainStatus) -> Self {
        Self {
            current: status.current,
            tracking: status.tracking,
            ahead: status.ahead,
            behind: status.behind,
            is_clean: status.files.is_empty(),
            files: status.files,
            merge_in_progress: None,
            rebase_in_progress: None,
        }
    }
}

impl GitService {
    pub async fn get_status(&self, dir: &Path) -> Result<StatusResult, GitServiceError> {
        let mut status = match self.status_via_adapter(dir).await {
            Some(status) => status,
            None => self.status_via_cli(dir).await?,
        };
        status.merge_in_progress = self.merge_in_progress(dir).await;
        status.rebase_in_progress = self.rebase_in_progress(dir).await;
        Ok(status)
    }

    pub async fn status_via_adapter(&self, dir: &Path) -> Option<StatusResult> {
        self.with_adapter("status", dir, |a, d| a.snapshot(d))
            .await
            .map(StatusResult::from_snapshot)
    }

    pub async fn status_via_cli(&self, dir: &Path) -> Result<StatusResult, GitServiceError> {
        let out = self
            .cli
            .git(
                dir,
                ["status", "--porcelain=v1", "-b", "--untracked-files=all"],
            )
            .await?;
        Ok(StatusResult::from_porcelain(parse::parse_porcelain_status(&out)))
    }

    /// Reported only when `MERGE_HEAD` resolves to a commit.
    pub async fn merge_in_progress(&self, dir: &Path) -> Option<MergeInProgress> {
        let out = self
            .cli
            .run(dir, ["rev-parse", "--short", "--verify", "--quiet", "MERGE_HEAD"])
            .await;
        let head = out.stdout.trim();
        if !out.success() || head.is_empty() {
            return None;
        }
        let message = match self.git_path(dir, "MERGE_MSG").await {
            Some(path) => read_trimmed(&path).await.and_then(|msg| {
                msg.lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .map(str::to_string)
            }),
            None => None,
        };
        Some(MergeInProgress {
            head: head.to_string(),
            message,
        })
    }

    pub async fn rebase_in_progress(&self, dir: &Path) -> Option<RebaseInProgress> {
        for marker in ["rebase-merge", "rebase-apply"] {
            let Some(state_dir) = self.git_path(dir, marker).await else {
                continue;
            };
            if !tokio::fs::try_exists(&state_dir).await.unwrap_or(false) {
                continue;
            }
            let head_name = read_trimmed(&state_dir.join("head-name"))
                .await
                .map(|h| h.trim_start_matches("refs/heads/").to_string());
            let onto = match read_trimmed(&state_dir.join("onto")).await {
                Some(full) => {
                    let out = self.cli.run(dir, ["rev-parse", "--short", full.as_str()]).await;
                    let short = out.stdout.trim();
                    Some(if out.success() && !short.is_empty() {
                        short.to_string()
                    } else {
                        full
                    })
                }
                None => None,
            };
            if head_name.is_some() || onto.is_some() {
                return Some(RebaseInProgress { head_name, onto });
            }
        }
        None
    }

    /// Path of a file inside this worktree's git directory.
    async fn git_path(&self, dir: &Path, name: &str) -> Option<PathBuf> {
        let out = self.cli.run(dir, ["rev-parse", "--git-path", name]).await;
        let path = out.stdout.trim();
        (out.success() && !path.is_empty()).then(|| dir.join(path))
    }

    pub async fn get_branches(&self, dir: &Path) -> Result<BranchSummary, GitServiceError> {
        let mut branches = match self
            .with_adapter("branches", dir, |a, d| a.branches(d))
            .await
        {
            Some(found) => found.into_iter().map(branch_from_adapter).collect(),
            None => self.branches_via_cli(dir).await?,
        };

        let current = branches
            .iter()
            .find(|b| b.current && !b.is_remote)
            .map(|b| b.name.clone());
        if let Some(info) = branches
            .iter_mut()
            .find(|b| b.current && !b.is_remote && b.tracking.is_some())
        {
            let out = self
                .cli
                .run(
                    dir,
                    ["rev-list", "--left-right", "--count", "HEAD...@{upstream}"],
                )
                .await;
            if out.success()
                && let Some((ahead, behind)) = parse::parse_ahead_behind(&out.stdout)
            {
                info.ahead = Some(ahead);
                info.behind = Some(behind);
            }
        }

        Ok(BranchSummary {
            all: branches.iter().map(|b| b.name.clone()).collect(),
            current,
            branches: branches.into_iter().map(|b| (b.name.clone(), b)).collect(),
        })
    }

    async fn branches_via_cli(&self, dir: &Path) -> Result<Vec<BranchInfo>, GitServiceError> {
        let out = self
            .cli
            .git(
                dir,
                ["for-each-ref", parse::BRANCH_FORMAT, "refs/heads", "refs/remotes"],
            )
            .await?;
        Ok(parse::parse_branch_listing(&out)
            .into_iter()
            .filter_map(|line| {
                let (name, is_remote) = if let Some(local) = line.refname.strip_prefix("refs/heads/")
                {
                    (local.to_string(), false)
                } else {
                    let remote = line.refname.strip_prefix("refs/remotes/")?;
                    if remote.ends_with("/HEAD") {
                        return None;
                    }
                    (format!("remotes/{remote}"), true)
                };
                Some(BranchInfo {
                    name,
                    current: line.current && !is_remote,
                    commit: line.commit,
                    label: line.subject,
                    tracking: line.upstream,
                    ahead: None,
                    behind: None,
                    is_remote,
                })
            })
            .collect())
    }
}

fn branch_from_adapter(branch: AdapterBranch) -> BranchInfo {
    let name = if branch.is_remote {
        format!("remotes/{}", branch.name)
    } else {
        branch.name
    };
    BranchInfo {
        name,
        current: branch.is_head && !branch.is_remote,
        commit: branch.commit,
        label: branch.subject,
        tracking: branch.upstream,
        ahead: None,
        behind: None,
        is_remote: branch.is_remote,
    }
}

async fn read_trimmed(path: &Path) -> Option<String> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AdapterChange, ChangeStatus};

    fn change(path: &str, status: ChangeStatus) -> AdapterChange {
        AdapterChange {
            path: path.into(),
            status,
        }
    }

    #[test]
    fn snapshot_buckets_merge_into_sorted_pairs() {
        let snapshot = RepositorySnapshot {
            head: Some("main".into()),
            upstream: Some("origin/main".into()),
            ahead: 1,
            behind: 0,
            index_changes: vec![change("b.txt", ChangeStatus::IndexModified)],
            working_tree_changes: vec![
                change("b.txt", ChangeStatus::Modified),
                change("a.txt", ChangeStatus::Untracked),
            ],
            merge_changes: vec![change("c.txt", ChangeStatus::BothModified)],
        };
        let status = StatusResult::from_snapshot(snapshot.clone());
        let pairs: Vec<_> = status
            .files
            .iter()
            .map(|f| (f.path.as_str(), f.index, f.working_dir))
            .collect();
        assert_eq!(
            pairs,
            vec![("a.txt", '?', '?'), ("b.txt", 'M', 'M'), ("c.txt", 'U', 'U')]
        );
        assert!(!status.is_clean);
        assert_eq!(status.tracking.as_deref(), Some("origin/main"));
        assert_eq!(StatusResult::from_snapshot(snapshot), status);
    }

    #[test]
    fn remote_adapter_branches_get_remotes_prefix() {
        let info = branch_from_adapter(AdapterBranch {
            name: "origin/main".into(),
            is_remote: true,
            commit: "abc1234".into(),
            subject: "init".into(),
            upstream: None,
            is_head: false,
        });
        assert_eq!(info.name, "remotes/origin/main");
        assert!(info.is_remote);
        assert!(!info.current);
    }
}
