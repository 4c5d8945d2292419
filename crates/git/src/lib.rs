use std::{
    ffi::OsString,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod adapter;
mod cli;
mod conflict;
mod credentials;
mod parse;
mod status;
#[cfg(test)]
mod testing;
mod validation;

pub use adapter::{
    AdapterBranch, AdapterChange, AdapterError, AdapterFactory, AdapterService, ChangeStatus,
    Git2Adapter, RepositoryAdapter, RepositorySnapshot,
};
pub use cli::{CommandExecutor, CommandOutput, GitCli, GitCliError, SystemExecutor};
pub use conflict::OperationOutcome;
pub use credentials::{CredentialError, CredentialResolver, ssh_command_for_key};
pub use parse::{
    ChangeType, DiffSummary, LogEntry, RemoteBranchRef, StatusFile, WorktreeEntry,
    parse_remote_branch,
};
pub use status::{BranchInfo, BranchSummary, MergeInProgress, RebaseInProgress, StatusResult};
pub use validation::{is_valid_branch_name, is_valid_branch_prefix};

#[derive(Debug, Error)]
pub enum GitServiceError {
    #[error(transparent)]
    GitCLI(#[from] GitCliError),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("Invalid repository: {0}")]
    InvalidRepository(String),
    #[error("Invalid branch name: {0}")]
    InvalidBranchName(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("{operation} failed: {stderr}")]
    OperationFailed {
        operation: &'static str,
        stderr: String,
    },
}

/// Directories that identify a repository from any path inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoContext {
    /// Top-level directory of the working tree that was asked about.
    pub sandbox: PathBuf,
    /// Metadata directory shared by every worktree of the repository.
    pub common_dir: PathBuf,
    /// Working tree that owns `common_dir`.
    pub primary_worktree: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorktreeInfo {
    pub name: String,
    pub branch: Option<String>,
    pub path: PathBuf,
    pub head: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiffOptions {
    pub path: Option<String>,
    #[serde(default)]
    pub staged: bool,
    pub context_lines: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub path: String,
    pub original: String,
    pub modified: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitRequest {
    pub message: String,
    #[serde(default)]
    pub add_all: bool,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitResult {
    pub commit: String,
    pub branch: Option<String>,
    pub summary: DiffSummary,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushOptions {
    pub remote: Option<String>,
    pub branch: Option<String>,
    #[serde(default)]
    pub set_upstream: bool,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushResult {
    pub output: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteOptions {
    pub remote: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullResult {
    pub files: Vec<String>,
    pub summary: DiffSummary,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StashOptions {
    pub message: Option<String>,
    #[serde(default)]
    pub include_untracked: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogOptions {
    pub max_count: Option<u32>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogResult {
    pub all: Vec<LogEntry>,
    pub total: usize,
    pub latest: Option<LogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitFile {
    pub path: String,
    pub old_path: Option<String>,
    pub change_type: ChangeType,
    pub insertions: u32,
    pub deletions: u32,
    pub is_binary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GitIdentity {
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub ssh_command: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityUpdate {
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub ssh_key_path: Option<PathBuf>,
}

/// Result of asking a remote whether it has a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteProbe {
    Found,
    Missing,
    Unreachable(String),
}

const DEFAULT_REMOTE: &str = "origin";
const DEFAULT_LOG_LIMIT: u32 = 50;
const MAX_LOG_LIMIT: u32 = 1000;

/// Repository operations for the IDE.
///
/// Reads and simple ref updates try the structured adapter first; anything
/// touching the network, the working tree in bulk, or merge state goes
/// straight to the `git` CLI.
#[derive(Clone)]
pub struct GitService {
    cli: GitCli,
    adapter: Arc<AdapterService>,
}

impl Default for GitService {
    fn default() -> Self {
        Self::new(GitCli::new(), Arc::new(AdapterService::new(true)))
    }
}

impl GitService {
    pub fn new(cli: GitCli, adapter: Arc<AdapterService>) -> Self {
        Self { cli, adapter }
    }

    /// Service that never uses the structured adapter.
    pub fn cli_only(cli: GitCli) -> Self {
        Self::new(cli, Arc::new(AdapterService::disabled()))
    }

    pub fn cli(&self) -> &GitCli {
        &self.cli
    }

    pub fn adapter(&self) -> &Arc<AdapterService> {
        &self.adapter
    }

    /// Run `f` against the structured adapter on the blocking pool. `None`
    /// means the caller should take the CLI path.
    pub(crate) async fn with_adapter<T, F>(&self, op: &'static str, dir: &Path, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RepositoryAdapter, &Path) -> Result<T, AdapterError> + Send + 'static,
    {
        let adapter = self.adapter.get_or_init()?;
        let dir = dir.to_path_buf();
        match tokio::task::spawn_blocking(move || f(adapter.as_ref(), &dir)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::debug!(op, "Structured adapter failed, falling back to git CLI: {e}");
                None
            }
            Err(e) => {
                tracing::warn!(op, "Structured adapter task failed: {e}");
                None
            }
        }
    }

    pub async fn checkout_branch(&self, dir: &Path, branch: &str) -> Result<(), GitServiceError> {
        ensure_not_option(branch, "branch")?;
        let name = branch.to_string();
        if self
            .with_adapter("checkout", dir, move |a, d| a.checkout(d, &name))
            .await
            .is_some()
        {
            return Ok(());
        }
        self.cli.git(dir, ["checkout", branch, "--"]).await?;
        Ok(())
    }

    /// Create `name` from `start_point` (or HEAD) and switch to it.
    pub async fn create_branch(
        &self,
        dir: &Path,
        name: &str,
        start_point: Option<&str>,
    ) -> Result<(), GitServiceError> {
        if !is_valid_branch_name(name) {
            return Err(GitServiceError::InvalidBranchName(name.to_string()));
        }
        if let Some(start) = start_point {
            ensure_not_option(start, "start point")?;
        }
        let (owned_name, owned_start) = (name.to_string(), start_point.map(str::to_string));
        if self
            .with_adapter("create_branch", dir, move |a, d| {
                a.create_branch(d, &owned_name, owned_start.as_deref(), true)
            })
            .await
            .is_some()
        {
            return Ok(());
        }
        let mut args = vec!["checkout", "-b", name];
        args.extend(start_point);
        self.cli.git(dir, args).await?;
        Ok(())
    }

    pub async fn delete_branch(
        &self,
        dir: &Path,
        name: &str,
        force: bool,
    ) -> Result<(), GitServiceError> {
        ensure_not_option(name, "branch")?;
        let owned = name.to_string();
        if self
            .with_adapter("delete_branch", dir, move |a, d| {
                a.delete_branch(d, &owned, force)
            })
            .await
            .is_some()
        {
            return Ok(());
        }
        let flag = if force { "-D" } else { "-d" };
        self.cli.git(dir, ["branch", flag, name]).await?;
        Ok(())
    }

    /// Delete `branch` on `remote` (default `origin`). Accepts the
    /// `remotes/<remote>/<branch>` form produced by [`Self::get_branches`].
    pub async fn delete_remote_branch(
        &self,
        dir: &Path,
        remote: Option<&str>,
        branch: &str,
    ) -> Result<(), GitServiceError> {
        let remote = remote.unwrap_or(DEFAULT_REMOTE);
        ensure_not_option(remote, "remote")?;
        let prefix = format!("remotes/{remote}/");
        let branch = branch.strip_prefix(&prefix).unwrap_or(branch);
        ensure_not_option(branch, "branch")?;
        self.cli.git(dir, ["push", remote, "--delete", branch]).await?;
        Ok(())
    }

    /// Raw `worktree list --porcelain` entries, bare entries included.
    pub async fn worktree_entries(&self, dir: &Path) -> Result<Vec<WorktreeEntry>, GitServiceError> {
        let out = self
            .cli
            .git(dir, ["worktree", "list", "--porcelain"])
            .await?;
        Ok(parse::parse_worktree_list(&out))
    }

    pub async fn list_worktrees(&self, dir: &Path) -> Result<Vec<WorktreeInfo>, GitServiceError> {
        Ok(self
            .worktree_entries(dir)
            .await?
            .into_iter()
            .filter(|e| !e.bare)
            .map(|e| WorktreeInfo {
                name: e
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                branch: e
                    .branch
                    .map(|b| b.trim_start_matches("refs/heads/").to_string()),
                path: e.path,
                head: e.head,
            })
            .collect())
    }

    pub async fn get_diff(&self, dir: &Path, opts: &DiffOptions) -> Result<String, GitServiceError> {
        let root = self.toplevel(dir).await?;
        let mut args: Vec<OsString> = vec!["diff".into(), "--no-color".into()];
        if let Some(n) = opts.context_lines {
            args.push(format!("-U{n}").into());
        }
        if opts.staged {
            args.push("--cached".into());
        }
        if let Some(path) = &opts.path {
            let rel = checked_relative(path)?;
            if !opts.staged && self.is_untracked(&root, rel).await? {
                return self.untracked_diff(&root, rel).await;
            }
            args.push("--".into());
            args.push(rel.into());
        }
        Ok(self.cli.git(&root, args).await?)
    }

    async fn is_untracked(&self, root: &Path, rel: &str) -> Result<bool, GitServiceError> {
        let out = self
            .cli
            .git(root, ["ls-files", "--others", "--exclude-standard", "--", rel])
            .await?;
        Ok(!out.trim().is_empty())
    }

    async fn untracked_diff(&self, root: &Path, rel: &str) -> Result<String, GitServiceError> {
        let out = self
            .cli
            .run(root, ["diff", "--no-color", "--no-index", "--", "/dev/null", rel])
            .await;
        // --no-index exits 1 when the inputs differ.
        match out.exit_code {
            0 | 1 => Ok(out.stdout),
            _ => Err(GitCliError::CommandFailed(out.failure_message()).into()),
        }
    }

    /// HEAD and current contents of one file, for side-by-side views.
    pub async fn get_file_diff(
        &self,
        dir: &Path,
        path: &str,
        staged: bool,
    ) -> Result<FileDiff, GitServiceError> {
        let root = self.toplevel(dir).await?;
        let rel = checked_relative(path)?.to_string();

        let original = self.show_blob(&root, Some("HEAD"), &rel).await;
        let modified = if staged {
            self.show_blob(&root, None, &rel).await
        } else {
            match tokio::fs::read(root.join(&rel)).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => return Err(e.into()),
            }
        };
        Ok(FileDiff {
            path: rel,
            original,
            modified,
        })
    }

    /// Blob text at `revision:path` (index when `None`); empty when absent.
    async fn show_blob(&self, root: &Path, revision: Option<&str>, rel: &str) -> String {
        let (rev, path) = (revision.map(str::to_string), rel.to_string());
        if let Some(content) = self
            .with_adapter("show", root, move |a, d| a.show(d, rev.as_deref(), &path))
            .await
        {
            return content.unwrap_or_default();
        }
        let spec = format!("{}:{rel}", revision.unwrap_or_default());
        let out = self.cli.run(root, ["show", spec.as_str()]).await;
        if out.success() { out.stdout } else { String::new() }
    }

    /// Discard every local change to one path.
    pub async fn revert_file(&self, dir: &Path, path: &str) -> Result<(), GitServiceError> {
        let root = self.toplevel(dir).await?;
        let rel = checked_relative(path)?;
        let out = self
            .cli
            .git(
                &root,
                ["status", "--porcelain", "--untracked-files=all", "--", rel],
            )
            .await?;
        let Some(entry) = parse::parse_porcelain_status(&out).files.into_iter().next() else {
            tracing::debug!(path = rel, "Nothing to revert");
            return Ok(());
        };
        match entry.index {
            '?' => remove_from_disk(&root.join(rel)).await,
            'A' => {
                self.cli
                    .git(&root, ["rm", "--cached", "-f", "-q", "--", rel])
                    .await?;
                remove_from_disk(&root.join(rel)).await
            }
            _ => {
                if let Err(e) = self.cli.git(&root, ["checkout", "HEAD", "--", rel]).await {
                    tracing::debug!("checkout from HEAD failed, retrying from index: {e}");
                    self.cli.git(&root, ["checkout", "--", rel]).await?;
                }
                Ok(())
            }
        }
    }

    pub async fn commit(
        &self,
        dir: &Path,
        request: &CommitRequest,
    ) -> Result<CommitResult, GitServiceError> {
        if request.message.trim().is_empty() {
            return Err(GitServiceError::InvalidArgument(
                "commit message is empty".to_string(),
            ));
        }
        if request.add_all {
            self.cli.git(dir, ["add", "-A"]).await?;
        } else if !request.files.is_empty() {
            let mut args: Vec<&str> = vec!["add", "--"];
            for file in &request.files {
                args.push(checked_relative(file)?);
            }
            self.cli.git(dir, args).await?;
        }
        self.cli
            .git(dir, ["commit", "-m", request.message.as_str()])
            .await?;

        let commit = self.head_commit(dir).await.ok_or_else(|| {
            GitServiceError::InvalidRepository("HEAD missing after commit".to_string())
        })?;
        let branch = self.current_branch(dir).await;
        let numstat = self
            .cli
            .git(dir, ["show", "--format=", "--numstat", "-z", "HEAD"])
            .await?;
        let summary = DiffSummary::from_numstat(&parse::parse_numstat_z(&numstat));
        tracing::debug!(commit, ?summary, "Created commit");
        Ok(CommitResult {
            commit,
            branch,
            summary,
        })
    }

    pub async fn push(&self, dir: &Path, opts: &PushOptions) -> Result<PushResult, GitServiceError> {
        let mut args = vec!["push"];
        if opts.set_upstream {
            args.push("-u");
        }
        if opts.force {
            args.push("--force-with-lease");
        }
        for value in [&opts.remote, &opts.branch].into_iter().flatten() {
            ensure_not_option(value, "push target")?;
        }
        match (opts.remote.as_deref(), opts.branch.as_deref()) {
            (Some(remote), Some(branch)) => args.extend([remote, branch]),
            (Some(remote), None) => args.push(remote),
            (None, Some(branch)) => args.extend([DEFAULT_REMOTE, branch]),
            (None, None) => {}
        }
        let out = checked(self.cli.run(dir, args).await)?;
        Ok(PushResult {
            output: format!("{}\n{}", out.stdout.trim(), out.stderr.trim())
                .trim()
                .to_string(),
        })
    }

    pub async fn pull(&self, dir: &Path, opts: &RemoteOptions) -> Result<PullResult, GitServiceError> {
        let before = self.head_commit(dir).await;
        let mut args = vec!["pull", "--no-edit"];
        args.extend(remote_args(opts)?);
        checked(self.cli.run(dir, args).await)?;
        let after = self.head_commit(dir).await;

        match (before, after) {
            (Some(before), Some(after)) if before != after => {
                let range = format!("{before}..{after}");
                let numstat = self
                    .cli
                    .git(dir, ["diff", "--numstat", "-z", range.as_str()])
                    .await?;
                let entries = parse::parse_numstat_z(&numstat);
                Ok(PullResult {
                    summary: DiffSummary::from_numstat(&entries),
                    files: entries.into_iter().map(|e| e.path).collect(),
                })
            }
            _ => Ok(PullResult::default()),
        }
    }

    pub async fn fetch(&self, dir: &Path, opts: &RemoteOptions) -> Result<(), GitServiceError> {
        let mut args = vec!["fetch", "--prune"];
        if opts.remote.is_none() {
            args.push("--all");
        }
        args.extend(remote_args(opts)?);
        checked(self.cli.run(dir, args).await)?;
        Ok(())
    }

    pub async fn stash(&self, dir: &Path, opts: &StashOptions) -> Result<(), GitServiceError> {
        let mut args = vec!["stash", "push"];
        if opts.include_untracked {
            args.push("--include-untracked");
        }
        if let Some(message) = opts.message.as_deref().filter(|m| !m.trim().is_empty()) {
            args.extend(["-m", message]);
        }
        self.cli.git(dir, args).await?;
        Ok(())
    }

    pub async fn get_log(&self, dir: &Path, opts: &LogOptions) -> Result<LogResult, GitServiceError> {
        if self.head_commit(dir).await.is_none() {
            return Ok(LogResult::default());
        }
        let limit = opts
            .max_count
            .unwrap_or(DEFAULT_LOG_LIMIT)
            .clamp(1, MAX_LOG_LIMIT);
        let mut args: Vec<String> = vec![
            "log".into(),
            parse::LOG_FORMAT.into(),
            "--shortstat".into(),
            format!("--max-count={limit}"),
        ];
        for value in [&opts.from, &opts.to].into_iter().flatten() {
            ensure_not_option(value, "revision")?;
        }
        match (opts.from.as_deref(), opts.to.as_deref()) {
            (Some(from), Some(to)) => args.push(format!("{from}..{to}")),
            (Some(from), None) => args.push(format!("{from}..HEAD")),
            (None, Some(to)) => args.push(to.to_string()),
            (None, None) => {}
        }
        if let Some(file) = &opts.file {
            args.push("--".into());
            args.push(checked_relative(file)?.to_string());
        }
        let out = self.cli.git(dir, args).await?;
        let all = parse::parse_log(&out);
        Ok(LogResult {
            total: all.len(),
            latest: all.first().cloned(),
            all,
        })
    }

    pub async fn get_commit_files(
        &self,
        dir: &Path,
        hash: &str,
    ) -> Result<Vec<CommitFile>, GitServiceError> {
        if hash.trim().is_empty() {
            return Err(GitServiceError::InvalidArgument("commit hash is empty".into()));
        }
        ensure_not_option(hash, "commit")?;
        let numstat = self
            .cli
            .git(dir, ["show", "--format=", "--numstat", "-z", "-M", hash])
            .await?;
        let names = self
            .cli
            .git(dir, ["show", "--format=", "--name-status", "-z", "-M", hash])
            .await?;
        let stats = parse::parse_numstat_z(&numstat);

        Ok(parse::parse_name_status_z(&names)
            .into_iter()
            .map(|entry| {
                let stat = stats.iter().find(|s| s.path == entry.path);
                let is_binary = stat.is_some_and(|s| s.insertions.is_none());
                CommitFile {
                    insertions: stat.and_then(|s| s.insertions).unwrap_or(0),
                    deletions: stat.and_then(|s| s.deletions).unwrap_or(0),
                    is_binary,
                    path: entry.path,
                    old_path: entry.old_path,
                    change_type: entry.change,
                }
            })
            .collect())
    }

    pub async fn get_config(&self, dir: &Path, key: &str) -> Result<Option<String>, GitServiceError> {
        let owned = key.to_string();
        if let Some(value) = self
            .with_adapter("get_config", dir, move |a, d| a.get_config(d, &owned))
            .await
        {
            return Ok(value);
        }
        let out = self.cli.run(dir, ["config", "--get", key]).await;
        match out.exit_code {
            0 => Ok(Some(out.stdout.trim().to_string())),
            1 => Ok(None),
            _ => Err(GitCliError::CommandFailed(out.failure_message()).into()),
        }
    }

    /// Write `key` to the repository-local config.
    pub async fn set_config(&self, dir: &Path, key: &str, value: &str) -> Result<(), GitServiceError> {
        let (k, v) = (key.to_string(), value.to_string());
        if self
            .with_adapter("set_config", dir, move |a, d| a.set_config(d, &k, &v))
            .await
            .is_some()
        {
            return Ok(());
        }
        self.cli.git(dir, ["config", "--local", key, value]).await?;
        Ok(())
    }

    pub async fn get_identity(&self, dir: &Path) -> Result<GitIdentity, GitServiceError> {
        Ok(GitIdentity {
            user_name: self.get_config(dir, "user.name").await?,
            user_email: self.get_config(dir, "user.email").await?,
            ssh_command: self.get_config(dir, "core.sshCommand").await?,
        })
    }

    pub async fn set_identity(
        &self,
        dir: &Path,
        update: &IdentityUpdate,
    ) -> Result<(), GitServiceError> {
        // Validate the key first so a rejected path leaves config untouched.
        let ssh_command = update
            .ssh_key_path
            .as_deref()
            .map(ssh_command_for_key)
            .transpose()?;
        if let Some(name) = update.user_name.as_deref().filter(|v| !v.trim().is_empty()) {
            self.set_config(dir, "user.name", name).await?;
        }
        if let Some(email) = update.user_email.as_deref().filter(|v| !v.trim().is_empty()) {
            self.set_config(dir, "user.email", email).await?;
        }
        if let Some(command) = ssh_command {
            self.set_config(dir, "core.sshCommand", &command).await?;
        }
        Ok(())
    }

    pub async fn toplevel(&self, dir: &Path) -> Result<PathBuf, GitServiceError> {
        let out = self
            .cli
            .git(dir, ["rev-parse", "--show-toplevel"])
            .await
            .map_err(|e| {
                GitServiceError::InvalidRepository(format!("{}: {e}", dir.display()))
            })?;
        Ok(dunce::canonicalize(out.trim())?)
    }

    pub async fn resolve_repo_context(&self, dir: &Path) -> Result<RepoContext, GitServiceError> {
        let sandbox = self.toplevel(dir).await?;
        let common = self.cli.git(dir, ["rev-parse", "--git-common-dir"]).await?;
        let common_dir = dunce::canonicalize(dir.join(common.trim()))?;
        let primary_worktree = common_dir
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                GitServiceError::InvalidRepository(format!(
                    "common dir {} has no parent",
                    common_dir.display()
                ))
            })?;
        Ok(RepoContext {
            sandbox,
            common_dir,
            primary_worktree,
        })
    }

    /// Hashes of every parentless commit reachable from any ref.
    pub async fn root_commits(&self, dir: &Path) -> Result<Vec<String>, GitServiceError> {
        let out = self
            .cli
            .run(dir, ["rev-list", "--max-parents=0", "--all"])
            .await;
        if !out.success() {
            tracing::debug!("rev-list for root commits failed: {}", out.failure_message());
            return Ok(Vec::new());
        }
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn head_commit(&self, dir: &Path) -> Option<String> {
        let out = self
            .cli
            .run(dir, ["rev-parse", "--verify", "--quiet", "HEAD"])
            .await;
        let hash = out.stdout.trim();
        (out.success() && !hash.is_empty()).then(|| hash.to_string())
    }

    pub async fn current_branch(&self, dir: &Path) -> Option<String> {
        let out = self
            .cli
            .run(dir, ["symbolic-ref", "--quiet", "--short", "HEAD"])
            .await;
        let name = out.stdout.trim();
        (out.success() && !name.is_empty()).then(|| name.to_string())
    }

    pub async fn local_branch_exists(&self, dir: &Path, name: &str) -> bool {
        let refname = format!("refs/heads/{name}");
        self.cli
            .run(dir, ["show-ref", "--verify", "--quiet", refname.as_str()])
            .await
            .success()
    }

    /// True when `rev` names a commit in this repository.
    pub async fn ref_exists(&self, dir: &Path, rev: &str) -> bool {
        if rev.starts_with('-') {
            return false;
        }
        let spec = format!("{rev}^{{commit}}");
        self.cli
            .run(dir, ["rev-parse", "--verify", "--quiet", spec.as_str()])
            .await
            .success()
    }

    pub async fn remote_url(&self, dir: &Path, remote: &str) -> Option<String> {
        if remote.starts_with('-') {
            return None;
        }
        let out = self.cli.run(dir, ["remote", "get-url", remote]).await;
        out.success().then(|| out.stdout.trim().to_string())
    }

    pub async fn remote_exists(&self, dir: &Path, remote: &str) -> bool {
        self.remote_url(dir, remote).await.is_some()
    }

    /// Add `name` pointing at `url`, or repoint it if it exists with another URL.
    pub async fn ensure_remote(&self, dir: &Path, name: &str, url: &str) -> Result<(), GitServiceError> {
        ensure_not_option(name, "remote")?;
        ensure_not_option(url, "remote url")?;
        match self.remote_url(dir, name).await {
            Some(existing) if existing == url => Ok(()),
            Some(_) => {
                tracing::info!(remote = name, url, "Updating remote URL");
                self.cli.git(dir, ["remote", "set-url", name, url]).await?;
                Ok(())
            }
            None => {
                tracing::info!(remote = name, url, "Adding remote");
                self.cli.git(dir, ["remote", "add", name, url]).await?;
                Ok(())
            }
        }
    }

    /// Ask `remote` (a name or URL) whether it has `branch`, without fetching.
    pub async fn probe_remote_branch(&self, dir: &Path, remote: &str, branch: &str) -> RemoteProbe {
        if remote.starts_with('-') {
            return RemoteProbe::Unreachable(format!("invalid remote {remote}"));
        }
        let refname = format!("refs/heads/{branch}");
        let out = self
            .cli
            .run(
                dir,
                ["ls-remote", "--exit-code", "--heads", remote, refname.as_str()],
            )
            .await;
        match out.exit_code {
            0 => RemoteProbe::Found,
            2 => RemoteProbe::Missing,
            _ => RemoteProbe::Unreachable(out.failure_message()),
        }
    }

    /// Fetch one branch into `refs/remotes/<remote>/<branch>`.
    pub async fn fetch_remote_branch(
        &self,
        dir: &Path,
        remote: &str,
        branch: &str,
    ) -> Result<(), GitServiceError> {
        ensure_not_option(remote, "remote")?;
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}");
        checked(self.cli.run(dir, ["fetch", remote, refspec.as_str()]).await)?;
        Ok(())
    }

    /// `git worktree add --no-checkout [-b <new_branch>] <path> <start_ref>`.
    pub async fn add_worktree(
        &self,
        dir: &Path,
        path: &Path,
        new_branch: Option<&str>,
        start_ref: &str,
    ) -> Result<(), GitServiceError> {
        ensure_not_option(start_ref, "start ref")?;
        let mut args: Vec<OsString> = vec!["worktree".into(), "add".into(), "--no-checkout".into()];
        if let Some(branch) = new_branch {
            if !is_valid_branch_name(branch) {
                return Err(GitServiceError::InvalidBranchName(branch.to_string()));
            }
            args.push("-b".into());
            args.push(branch.into());
        }
        args.push(path.as_os_str().into());
        args.push(start_ref.into());
        self.cli.git(dir, args).await?;
        Ok(())
    }

    pub async fn remove_worktree(&self, dir: &Path, path: &Path) -> Result<(), GitServiceError> {
        let args: [OsString; 4] = [
            "worktree".into(),
            "remove".into(),
            "--force".into(),
            path.as_os_str().into(),
        ];
        self.cli.git(dir, args).await?;
        Ok(())
    }

    /// Populate a `--no-checkout` worktree from its HEAD.
    pub async fn reset_hard(&self, dir: &Path) -> Result<(), GitServiceError> {
        self.cli.git(dir, ["reset", "--hard", "--quiet"]).await?;
        Ok(())
    }

    pub async fn set_upstream(
        &self,
        dir: &Path,
        local_branch: &str,
        remote: &str,
        branch: &str,
    ) -> Result<(), GitServiceError> {
        let upstream = format!("--set-upstream-to={remote}/{branch}");
        self.cli
            .git(dir, ["branch", upstream.as_str(), local_branch])
            .await?;
        Ok(())
    }
}

fn checked(out: CommandOutput) -> Result<CommandOutput, GitServiceError> {
    if out.success() {
        Ok(out)
    } else {
        Err(GitCli::classify_cli_error(out.failure_message()).into())
    }
}

fn remote_args(opts: &RemoteOptions) -> Result<Vec<&str>, GitServiceError> {
    let mut args = Vec::new();
    if let Some(remote) = opts.remote.as_deref() {
        ensure_not_option(remote, "remote")?;
        args.push(remote);
        if let Some(branch) = opts.branch.as_deref() {
            ensure_not_option(branch, "branch")?;
            args.push(branch);
        }
    }
    Ok(args)
}

/// Reject values git would parse as options.
fn ensure_not_option(value: &str, what: &str) -> Result<(), GitServiceError> {
    if value.starts_with('-') {
        Err(GitServiceError::InvalidArgument(format!(
            "{what} must not start with '-': {value}"
        )))
    } else {
        Ok(())
    }
}

/// Paths from callers must stay inside the repository.
fn checked_relative(path: &str) -> Result<&str, GitServiceError> {
    let p = Path::new(path);
    let escapes = p.is_absolute()
        || p.components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
    if path.trim().is_empty() || escapes {
        return Err(GitServiceError::InvalidPath(path.to_string()));
    }
    Ok(path)
}

async fn remove_from_disk(path: &Path) -> Result<(), GitServiceError> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await?,
        Ok(_) => tokio::fs::remove_file(path).await?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
