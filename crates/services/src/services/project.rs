//! Per-project side records listing the worktrees ("sandboxes") created for
//! a repository, keyed by a project id derived from its root commit.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::Utc;
use git::{GitService, GitServiceError, RepoContext};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utils::path::canonicalize_for_compare;

/// File inside the common git directory caching the project id.
pub const PROJECT_ID_MARKER: &str = "opencode";

#[derive(Debug, Error)]
pub enum ProjectStoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Invalid project id: {0}")]
    InvalidId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTime {
    pub created: i64,
    pub updated: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCommands {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    /// Primary worktree of the repository.
    pub worktree: PathBuf,
    pub vcs: String,
    #[serde(default)]
    pub sandboxes: Vec<PathBuf>,
    pub time: ProjectTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<ProjectCommands>,
}

impl ProjectRecord {
    pub fn new(id: &str, worktree: &Path) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: id.to_string(),
            worktree: worktree.to_path_buf(),
            vcs: "git".to_string(),
            sandboxes: Vec::new(),
            time: ProjectTime {
                created: now,
                updated: now,
            },
            commands: None,
        }
    }

    fn add_sandbox(&mut self, sandbox: &Path) {
        self.sandboxes.push(sandbox.to_path_buf());
        self.dedupe_sandboxes();
        self.time.updated = Utc::now().timestamp_millis();
    }

    fn remove_sandbox(&mut self, sandbox: &Path) {
        let target = canonicalize_for_compare(sandbox);
        self.sandboxes
            .retain(|p| p != sandbox && canonicalize_for_compare(p) != target);
        self.dedupe_sandboxes();
        self.time.updated = Utc::now().timestamp_millis();
    }

    /// Drop repeated paths, keeping the first occurrence.
    fn dedupe_sandboxes(&mut self) {
        let mut seen = Vec::with_capacity(self.sandboxes.len());
        self.sandboxes.retain(|p| {
            if seen.contains(p) {
                false
            } else {
                seen.push(p.clone());
                true
            }
        });
    }

    pub fn start_command(&self) -> Option<&str> {
        self.commands
            .as_ref()
            .and_then(|c| c.start.as_deref())
            .filter(|c| !c.trim().is_empty())
    }
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<ProjectRecord>, ProjectStoreError>;

    /// Record `sandbox` for the project, creating the record when missing.
    async fn add_sandbox(
        &self,
        id: &str,
        primary_worktree: &Path,
        sandbox: &Path,
    ) -> Result<ProjectRecord, ProjectStoreError>;

    async fn remove_sandbox(
        &self,
        id: &str,
        sandbox: &Path,
    ) -> Result<Option<ProjectRecord>, ProjectStoreError>;

    async fn start_command(&self, id: &str) -> Result<Option<String>, ProjectStoreError> {
        Ok(self
            .get(id)
            .await?
            .and_then(|r| r.start_command().map(str::to_string)))
    }
}

/// Stores each record at `<data-root>/storage/project/<id>.json`.
pub struct JsonProjectStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonProjectStore {
    pub fn new(data_root: &Path) -> Self {
        Self {
            dir: data_root.join("storage").join("project"),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn record_path(&self, id: &str) -> Result<PathBuf, ProjectStoreError> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProjectStoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn read(&self, id: &str) -> Result<Option<ProjectRecord>, ProjectStoreError> {
        let path = self.record_path(id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, record: &ProjectRecord) -> Result<(), ProjectStoreError> {
        let path = self.record_path(&record.id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, serde_json::to_string_pretty(record)?).await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for JsonProjectStore {
    async fn get(&self, id: &str) -> Result<Option<ProjectRecord>, ProjectStoreError> {
        self.read(id).await
    }

    async fn add_sandbox(
        &self,
        id: &str,
        primary_worktree: &Path,
        sandbox: &Path,
    ) -> Result<ProjectRecord, ProjectStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .read(id)
            .await?
            .unwrap_or_else(|| ProjectRecord::new(id, primary_worktree));
        record.add_sandbox(sandbox);
        self.write(&record).await?;
        tracing::debug!(project = id, sandbox = ?sandbox, "Registered sandbox");
        Ok(record)
    }

    async fn remove_sandbox(
        &self,
        id: &str,
        sandbox: &Path,
    ) -> Result<Option<ProjectRecord>, ProjectStoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut record) = self.read(id).await? else {
            return Ok(None);
        };
        record.remove_sandbox(sandbox);
        self.write(&record).await?;
        tracing::debug!(project = id, sandbox = ?sandbox, "Deregistered sandbox");
        Ok(Some(record))
    }
}

#[derive(Default)]
pub struct InMemoryProjectStore {
    records: Mutex<HashMap<String, ProjectRecord>>,
}

impl InMemoryProjectStore {
    pub fn insert(&self, record: ProjectRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id.clone(), record);
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn get(&self, id: &str) -> Result<Option<ProjectRecord>, ProjectStoreError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn add_sandbox(
        &self,
        id: &str,
        primary_worktree: &Path,
        sandbox: &Path,
    ) -> Result<ProjectRecord, ProjectStoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = records
            .entry(id.to_string())
            .or_insert_with(|| ProjectRecord::new(id, primary_worktree));
        record.add_sandbox(sandbox);
        Ok(record.clone())
    }

    async fn remove_sandbox(
        &self,
        id: &str,
        sandbox: &Path,
    ) -> Result<Option<ProjectRecord>, ProjectStoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get_mut(id).map(|record| {
            record.remove_sandbox(sandbox);
            record.clone()
        }))
    }
}

/// Project id for the repository: the cached marker if present, otherwise
/// the smallest root commit hash. `None` for a repository without commits.
/// The marker is only written when `persist` is set.
pub async fn resolve_project_id(
    git: &GitService,
    ctx: &RepoContext,
    persist: bool,
) -> Result<Option<String>, GitServiceError> {
    let marker = ctx.common_dir.join(PROJECT_ID_MARKER);
    if let Ok(raw) = tokio::fs::read_to_string(&marker).await {
        let id = raw.trim();
        if !id.is_empty() {
            return Ok(Some(id.to_string()));
        }
    }

    let Some(id) = git.root_commits(&ctx.sandbox).await?.into_iter().min() else {
        return Ok(None);
    };
    if persist && let Err(e) = tokio::fs::write(&marker, &id).await {
        tracing::warn!(marker = ?marker, "Failed to cache project id: {e}");
    }
    Ok(Some(id))
}
