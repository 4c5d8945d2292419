//! Create, validate, and remove worktrees under `<data-root>/worktree/<project-id>`.
//!
//! Validation and creation share one resolution routine so a successful dry
//! run predicts what creation will do. Validation never writes: remote
//! branches are probed with `ls-remote` rather than fetched.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use git::{
    GitService, GitServiceError, RemoteProbe, RepoContext, WorktreeInfo, is_valid_branch_name,
    parse_remote_branch,
};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use utils::{path::canonicalize_for_compare, text::slugify};

use super::{
    project::{ProjectStore, resolve_project_id},
    start_scripts::spawn_start_scripts,
    upstream::{UpstreamTarget, configure_upstream},
};

pub const WORKTREE_ADJECTIVES: &[&str] = &[
    "swift", "quick", "bright", "calm", "clever", "cool", "crisp", "eager", "fast", "fresh",
    "keen", "light", "neat", "prime", "sharp", "silent", "smooth", "steady", "warm", "bold",
    "brave", "clear", "fleet", "golden", "agile", "nimble", "rapid", "blazing", "cosmic",
];

pub const WORKTREE_NOUNS: &[&str] = &[
    "fox", "wolf", "bear", "hawk", "lion", "tiger", "raven", "eagle", "falcon", "otter", "cedar",
    "maple", "oak", "pine", "willow", "river", "stream", "brook", "delta", "canyon", "spark",
    "flame", "ember", "comet", "meteor", "nova", "pulse", "wave", "drift", "glow",
];

/// Total naming attempts: the bare slug plus suffixed variants.
const MAX_NAME_ATTEMPTS: usize = 26;
const DEFAULT_START_REF: &str = "HEAD";

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error(transparent)]
    GitService(#[from] GitServiceError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{}", .0.message)]
    Validation(ValidationIssue),
    #[error("repository has no commits, so it has no project id")]
    NoProjectId,
    #[error("cannot remove the primary worktree")]
    CannotRemovePrimary,
    #[error("worktree request resolved to no target")]
    Unresolved,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeMode {
    #[default]
    New,
    Existing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    BranchNotFound,
    BranchExists,
    BranchInUse,
    StartRefNotFound,
    RemoteUnreachable,
    RemoteNotFound,
    InvalidRemoteConfig,
    UpstreamIncomplete,
    NameUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub code: ValidationCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTarget {
    pub mode: WorktreeMode,
    pub local_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub errors: Vec<ValidationIssue>,
    pub resolved: Option<ResolvedTarget>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateWorktreeRequest {
    #[serde(default)]
    pub mode: WorktreeMode,
    pub worktree_name: Option<String>,
    /// New mode: explicit branch name. Existing mode: local name for a remote branch.
    pub branch_name: Option<String>,
    pub existing_branch: Option<String>,
    pub start_ref: Option<String>,
    #[serde(default)]
    pub set_upstream: bool,
    pub upstream_remote: Option<String>,
    pub upstream_branch: Option<String>,
    pub remote_name: Option<String>,
    pub remote_url: Option<String>,
    pub start_command: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveWorktreeRequest {
    pub path: PathBuf,
    #[serde(default)]
    pub delete_local_branch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Validate,
    Create,
}

/// Issue sink: collects in validation, stops at the first issue in creation.
struct Issues {
    phase: Phase,
    list: Vec<ValidationIssue>,
}

impl Issues {
    fn raise(
        &mut self,
        code: ValidationCode,
        message: impl Into<String>,
    ) -> Result<(), WorktreeError> {
        let issue = ValidationIssue {
            code,
            message: message.into(),
        };
        match self.phase {
            Phase::Create => Err(WorktreeError::Validation(issue)),
            Phase::Validate => {
                self.list.push(issue);
                Ok(())
            }
        }
    }
}

/// Everything creation needs once all checks have passed.
#[derive(Debug)]
struct WorktreePlan {
    ctx: RepoContext,
    project_id: String,
    root: PathBuf,
    name: String,
    local_branch: String,
    create_branch: bool,
    start_ref: String,
    upstream: Option<UpstreamTarget>,
    remote_url: Option<String>,
}

impl WorktreePlan {
    fn path(&self) -> PathBuf {
        self.root.join(&self.name)
    }
}

/// Remote override from the request, applied only when both halves are present.
struct RemoteOverride<'a> {
    name: &'a str,
    url: &'a str,
}

#[derive(Clone)]
pub struct WorktreeManager {
    git: GitService,
    store: Arc<dyn ProjectStore>,
    data_root: PathBuf,
    branch_prefix: String,
}

impl WorktreeManager {
    pub fn new(
        git: GitService,
        store: Arc<dyn ProjectStore>,
        data_root: PathBuf,
        branch_prefix: impl Into<String>,
    ) -> Self {
        Self {
            git,
            store,
            data_root,
            branch_prefix: branch_prefix.into(),
        }
    }

    pub fn worktree_root(&self, project_id: &str) -> PathBuf {
        self.data_root.join("worktree").join(project_id)
    }

    fn branch_for_name(&self, name: &str) -> String {
        if self.branch_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.branch_prefix)
        }
    }

    /// Dry run of [`Self::create`]; reports every issue and mutates nothing.
    pub async fn validate(
        &self,
        dir: &Path,
        request: &CreateWorktreeRequest,
    ) -> Result<ValidationResult, WorktreeError> {
        let mut issues = Issues {
            phase: Phase::Validate,
            list: Vec::new(),
        };
        let plan = self.resolve(dir, request, &mut issues).await?;
        Ok(ValidationResult {
            ok: issues.list.is_empty(),
            resolved: plan.map(|p| ResolvedTarget {
                mode: request.mode,
                local_branch: p.local_branch,
            }),
            errors: issues.list,
        })
    }

    pub async fn create(
        &self,
        dir: &Path,
        request: &CreateWorktreeRequest,
    ) -> Result<WorktreeInfo, WorktreeError> {
        let mut issues = Issues {
            phase: Phase::Create,
            list: Vec::new(),
        };
        // Every issue raised in creation returns early, so no plan means a bug.
        let plan = self
            .resolve(dir, request, &mut issues)
            .await?
            .ok_or(WorktreeError::Unresolved)?;
        let path = plan.path();
        info!(
            worktree = ?path,
            branch = %plan.local_branch,
            start = %plan.start_ref,
            "Creating worktree"
        );

        tokio::fs::create_dir_all(&plan.root).await?;
        let new_branch = plan.create_branch.then_some(plan.local_branch.as_str());
        self.git
            .add_worktree(&plan.ctx.sandbox, &path, new_branch, &plan.start_ref)
            .await?;
        self.git.reset_hard(&path).await?;

        if let Err(e) = self
            .store
            .add_sandbox(&plan.project_id, &plan.ctx.primary_worktree, &path)
            .await
        {
            warn!(project = %plan.project_id, "Failed to record sandbox: {e}");
        }

        if let Some(target) = &plan.upstream
            && let Err(e) = configure_upstream(
                &self.git,
                &path,
                &plan.local_branch,
                target,
                plan.remote_url.as_deref(),
            )
            .await
        {
            warn!(
                worktree = ?path,
                remote = %target.remote,
                branch = %target.branch,
                "Worktree kept without upstream: {e}"
            );
        }

        spawn_start_scripts(
            self.git.cli().clone(),
            self.store.clone(),
            plan.project_id.clone(),
            path.clone(),
            request.start_command.clone(),
        );

        Ok(WorktreeInfo {
            head: self.git.head_commit(&path).await,
            name: plan.name,
            branch: Some(plan.local_branch),
            path,
        })
    }

    /// Remove a worktree. `project_dir` is any directory of the repository
    /// other than the worktree itself, which may already be gone.
    pub async fn remove(
        &self,
        project_dir: &Path,
        request: &RemoveWorktreeRequest,
    ) -> Result<(), WorktreeError> {
        let ctx = self.git.resolve_repo_context(project_dir).await?;
        let target = canonicalize_for_compare(&request.path);
        if target == canonicalize_for_compare(&ctx.primary_worktree) {
            return Err(WorktreeError::CannotRemovePrimary);
        }
        let project_id = resolve_project_id(&self.git, &ctx, true).await?;

        let entries = self.git.worktree_entries(&ctx.primary_worktree).await?;
        match entries
            .iter()
            .find(|e| canonicalize_for_compare(&e.path) == target)
        {
            None => {
                info!(worktree = ?request.path, "Worktree not registered with git, deleting directory");
                if tokio::fs::try_exists(&request.path).await.unwrap_or(false)
                    && let Err(e) = tokio::fs::remove_dir_all(&request.path).await
                {
                    warn!(worktree = ?request.path, "Failed to delete worktree directory: {e}");
                }
            }
            Some(entry) => {
                self.git
                    .remove_worktree(&ctx.primary_worktree, &entry.path)
                    .await?;
                info!(worktree = ?entry.path, "Removed worktree");
                if request.delete_local_branch
                    && let Some(branch) = entry
                        .branch
                        .as_deref()
                        .and_then(|b| b.strip_prefix("refs/heads/"))
                    && let Err(e) = self
                        .git
                        .delete_branch(&ctx.primary_worktree, branch, true)
                        .await
                {
                    warn!(branch, "Failed to delete worktree branch: {e}");
                }
            }
        }

        if let Some(id) = project_id
            && let Err(e) = self.store.remove_sandbox(&id, &request.path).await
        {
            warn!(project = %id, "Failed to deregister sandbox: {e}");
        }
        Ok(())
    }

    async fn resolve(
        &self,
        dir: &Path,
        request: &CreateWorktreeRequest,
        issues: &mut Issues,
    ) -> Result<Option<WorktreePlan>, WorktreeError> {
        let persist = issues.phase == Phase::Create;
        let ctx = self.git.resolve_repo_context(dir).await?;
        let project_id = resolve_project_id(&self.git, &ctx, persist)
            .await?
            .ok_or(WorktreeError::NoProjectId)?;
        let root = self.worktree_root(&project_id);
        let repo = ctx.sandbox.clone();

        let remote_override = match (
            non_empty(&request.remote_name),
            non_empty(&request.remote_url),
        ) {
            (Some(name), Some(url)) => Some(RemoteOverride { name, url }),
            (None, None) => None,
            _ => {
                issues.raise(
                    ValidationCode::InvalidRemoteConfig,
                    "remote name and remote URL must be given together",
                )?;
                None
            }
        };

        let explicit_upstream = match (
            non_empty(&request.upstream_remote),
            non_empty(&request.upstream_branch),
        ) {
            (Some(remote), Some(branch)) => Some(UpstreamTarget {
                remote: remote.to_string(),
                branch: branch.to_string(),
            }),
            (None, None) => None,
            _ => {
                issues.raise(
                    ValidationCode::UpstreamIncomplete,
                    "upstream remote and upstream branch must be given together",
                )?;
                None
            }
        };

        let (local_branch, create_branch, start_ref, inferred_upstream, preferred_name) =
            match request.mode {
                WorktreeMode::New => {
                    let start_ref = non_empty(&request.start_ref)
                        .unwrap_or(DEFAULT_START_REF)
                        .to_string();
                    let inferred = self
                        .check_start_ref(&repo, &start_ref, remote_override.as_ref(), issues)
                        .await?;
                    let explicit_branch = match non_empty(&request.branch_name) {
                        Some(b) if !is_valid_branch_name(b) => {
                            return Err(GitServiceError::InvalidBranchName(b.to_string()).into());
                        }
                        Some(b) => {
                            if self.git.local_branch_exists(&repo, b).await {
                                issues.raise(
                                    ValidationCode::BranchExists,
                                    format!("branch {b} already exists"),
                                )?;
                            }
                            Some(b.to_string())
                        }
                        None => None,
                    };
                    let preferred = non_empty(&request.worktree_name)
                        .or(explicit_branch.as_deref())
                        .map(str::to_string);
                    (explicit_branch, true, start_ref, inferred, preferred)
                }
                WorktreeMode::Existing => {
                    let Some(existing) = non_empty(&request.existing_branch)
                        .or(non_empty(&request.branch_name))
                    else {
                        issues.raise(ValidationCode::BranchNotFound, "no existing branch given")?;
                        return Ok(None);
                    };
                    let existing = existing.trim_start_matches("refs/heads/");
                    match self
                        .resolve_existing(&repo, existing, request, remote_override.as_ref(), issues)
                        .await?
                    {
                        Some((local, create, start, inferred)) => {
                            let preferred = non_empty(&request.worktree_name)
                                .unwrap_or(local.as_str())
                                .to_string();
                            (Some(local), create, start, inferred, Some(preferred))
                        }
                        None => return Ok(None),
                    }
                }
            };

        let fixed_branch = local_branch.is_some();
        let Some(name) = self
            .pick_name(&repo, &root, preferred_name.as_deref(), fixed_branch)
            .await
        else {
            issues.raise(
                ValidationCode::NameUnavailable,
                "failed to generate a unique name",
            )?;
            return Ok(None);
        };
        let local_branch = local_branch.unwrap_or_else(|| self.branch_for_name(&name));

        let branch_ref = format!("refs/heads/{local_branch}");
        if let Some(holder) = self
            .git
            .worktree_entries(&repo)
            .await?
            .into_iter()
            .find(|e| e.branch.as_deref() == Some(branch_ref.as_str()))
        {
            issues.raise(
                ValidationCode::BranchInUse,
                format!(
                    "branch already in use by worktree {}",
                    holder.path.display()
                ),
            )?;
        }

        let upstream = if request.set_upstream {
            match explicit_upstream.or(inferred_upstream) {
                Some(target) => {
                    let overridden = remote_override
                        .as_ref()
                        .is_some_and(|o| o.name == target.remote);
                    if !overridden && !self.git.remote_exists(&repo, &target.remote).await {
                        issues.raise(
                            ValidationCode::RemoteNotFound,
                            format!("remote {} does not exist", target.remote),
                        )?;
                    }
                    Some(target)
                }
                None => {
                    issues.raise(
                        ValidationCode::UpstreamIncomplete,
                        "set upstream requested without an upstream remote and branch",
                    )?;
                    None
                }
            }
        } else {
            None
        };
        let remote_url = match (&upstream, &remote_override) {
            (Some(target), Some(o)) if o.name == target.remote => Some(o.url.to_string()),
            _ => None,
        };

        Ok(Some(WorktreePlan {
            ctx,
            project_id,
            root,
            name,
            local_branch,
            create_branch,
            start_ref,
            upstream,
            remote_url,
        }))
    }

    /// Check the start ref of a new branch, fetching it first when it names a
    /// branch on the overridden remote. Returns the upstream it implies.
    async fn check_start_ref(
        &self,
        repo: &Path,
        start_ref: &str,
        remote_override: Option<&RemoteOverride<'_>>,
        issues: &mut Issues,
    ) -> Result<Option<UpstreamTarget>, WorktreeError> {
        let remote_ref = parse_remote_branch(start_ref);
        if let (Some(rb), Some(o)) = (&remote_ref, remote_override)
            && rb.remote == o.name
        {
            self.ensure_remote_branch(
                repo,
                &rb.remote,
                &rb.branch,
                Some(o),
                issues,
                ValidationCode::StartRefNotFound,
            )
            .await?;
            return Ok(Some(UpstreamTarget::from(rb.clone())));
        }

        if !self.git.ref_exists(repo, start_ref).await {
            issues.raise(
                ValidationCode::StartRefNotFound,
                format!("start ref {start_ref} not found"),
            )?;
            return Ok(None);
        }
        match remote_ref {
            Some(rb) if self.git.remote_exists(repo, &rb.remote).await => Ok(Some(rb.into())),
            _ => Ok(None),
        }
    }

    /// Existing mode: `(local_branch, create_branch, start_ref, inferred_upstream)`.
    async fn resolve_existing(
        &self,
        repo: &Path,
        existing: &str,
        request: &CreateWorktreeRequest,
        remote_override: Option<&RemoteOverride<'_>>,
        issues: &mut Issues,
    ) -> Result<Option<(String, bool, String, Option<UpstreamTarget>)>, WorktreeError> {
        if self.git.local_branch_exists(repo, existing).await {
            return Ok(Some((existing.to_string(), false, existing.to_string(), None)));
        }

        let Some(rb) = parse_remote_branch(existing) else {
            issues.raise(
                ValidationCode::BranchNotFound,
                format!("branch {existing} not found"),
            )?;
            return Ok(None);
        };
        let override_for_remote = remote_override.filter(|o| o.name == rb.remote);
        if !self.git.ref_exists(repo, &rb.canonical_ref()).await {
            if override_for_remote.is_none() && !self.git.remote_exists(repo, &rb.remote).await {
                issues.raise(
                    ValidationCode::RemoteNotFound,
                    format!("remote {} does not exist", rb.remote),
                )?;
                return Ok(None);
            }
            if !self
                .ensure_remote_branch(
                    repo,
                    &rb.remote,
                    &rb.branch,
                    override_for_remote,
                    issues,
                    ValidationCode::BranchNotFound,
                )
                .await?
            {
                return Ok(None);
            }
        }

        let local = non_empty(&request.branch_name)
            .filter(|b| *b != existing)
            .unwrap_or(rb.branch.as_str())
            .to_string();
        if !is_valid_branch_name(&local) {
            return Err(GitServiceError::InvalidBranchName(local).into());
        }
        if self.git.local_branch_exists(repo, &local).await {
            issues.raise(
                ValidationCode::BranchExists,
                format!("branch {local} already exists"),
            )?;
        }
        let start_ref = rb.canonical_ref();
        Ok(Some((local, true, start_ref, Some(rb.into()))))
    }

    /// Make `refs/remotes/<remote>/<branch>` available. Creation fetches it;
    /// validation only asks the remote. Returns whether it is (or would be)
    /// available.
    async fn ensure_remote_branch(
        &self,
        repo: &Path,
        remote: &str,
        branch: &str,
        remote_override: Option<&RemoteOverride<'_>>,
        issues: &mut Issues,
        missing_code: ValidationCode,
    ) -> Result<bool, WorktreeError> {
        match issues.phase {
            Phase::Validate => {
                let target = remote_override.map_or(remote, |o| o.url);
                match self.git.probe_remote_branch(repo, target, branch).await {
                    RemoteProbe::Found => Ok(true),
                    RemoteProbe::Missing => {
                        issues.raise(
                            missing_code,
                            format!("branch {branch} not found on {remote}"),
                        )?;
                        Ok(false)
                    }
                    RemoteProbe::Unreachable(reason) => {
                        debug!(remote, "ls-remote failed: {reason}");
                        issues.raise(
                            ValidationCode::RemoteUnreachable,
                            format!("remote {remote} is unreachable"),
                        )?;
                        Ok(false)
                    }
                }
            }
            Phase::Create => {
                if let Some(o) = remote_override {
                    self.git.ensure_remote(repo, o.name, o.url).await?;
                }
                if let Err(e) = self.git.fetch_remote_branch(repo, remote, branch).await {
                    debug!(remote, branch, "Fetch failed: {e}");
                    issues.raise(
                        missing_code,
                        format!("branch {branch} could not be fetched from {remote}"),
                    )?;
                }
                Ok(true)
            }
        }
    }

    /// First free candidate: the slug itself, then `slug-<adjective>-<noun>`.
    /// A candidate is free when its directory does not exist and, unless the
    /// branch is fixed, its generated branch is a valid ref name that does
    /// not exist yet.
    async fn pick_name(
        &self,
        repo: &Path,
        root: &Path,
        preferred: Option<&str>,
        fixed_branch: bool,
    ) -> Option<String> {
        let base = preferred.map(slugify).filter(|s| !s.is_empty());
        for candidate in candidate_names(base.as_deref()) {
            if tokio::fs::try_exists(root.join(&candidate))
                .await
                .unwrap_or(true)
            {
                continue;
            }
            if fixed_branch {
                return Some(candidate);
            }
            let branch = self.branch_for_name(&candidate);
            if !is_valid_branch_name(&branch) {
                debug!(candidate, branch, "Skipping name with an invalid branch");
                continue;
            }
            if self.git.local_branch_exists(repo, &branch).await {
                continue;
            }
            return Some(candidate);
        }
        None
    }
}

fn candidate_names(base: Option<&str>) -> Vec<String> {
    let mut rng = rand::thread_rng();
    let mut random_pair = || {
        let adjective = WORKTREE_ADJECTIVES.choose(&mut rng).copied().unwrap_or("swift");
        let noun = WORKTREE_NOUNS.choose(&mut rng).copied().unwrap_or("fox");
        format!("{adjective}-{noun}")
    };
    match base {
        Some(base) => std::iter::once(base.to_string())
            .chain((1..MAX_NAME_ATTEMPTS).map(|_| format!("{base}-{}", random_pair())))
            .collect(),
        None => (0..MAX_NAME_ATTEMPTS).map(|_| random_pair()).collect(),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
