//! Structured repository access through libgit2.
//!
//! Every operation here has a CLI counterpart in [`crate::GitService`]; the
//! service tries the adapter first and falls back to the CLI when the adapter
//! is disabled or returns an error.
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use git2::{
    Branch, BranchType, ConfigLevel, ErrorCode, ObjectType, Repository, Status, StatusEntry,
    StatusOptions, build::CheckoutBuilder,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error("{0}")]
    Refused(String),
}

/// Change kinds reported by the structured adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    IndexModified,
    IndexAdded,
    IndexDeleted,
    IndexRenamed,
    IndexCopied,
    Modified,
    Deleted,
    Untracked,
    Ignored,
    IntentToAdd,
    IntentToRename,
    TypeChanged,
    AddedByUs,
    AddedByThem,
    DeletedByUs,
    DeletedByThem,
    BothAdded,
    BothDeleted,
    BothModified,
    Unknown,
}

impl ChangeStatus {
    /// Single-character porcelain code for this change.
    pub fn code(self) -> char {
        use ChangeStatus::*;
        match self {
            IndexModified | Modified => 'M',
            IndexAdded | IntentToAdd => 'A',
            IndexDeleted | Deleted => 'D',
            IndexRenamed | IntentToRename => 'R',
            IndexCopied => 'C',
            Untracked => '?',
            Ignored => '!',
            TypeChanged => 'T',
            AddedByUs | AddedByThem | DeletedByUs | DeletedByThem | BothAdded | BothDeleted
            | BothModified => 'U',
            Unknown => ' ',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterChange {
    pub path: String,
    pub status: ChangeStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositorySnapshot {
    pub head: Option<String>,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub index_changes: Vec<AdapterChange>,
    pub working_tree_changes: Vec<AdapterChange>,
    pub merge_changes: Vec<AdapterChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterBranch {
    /// Short name; remote branches keep their remote prefix (`origin/main`).
    pub name: String,
    pub is_remote: bool,
    pub commit: String,
    pub subject: String,
    pub upstream: Option<String>,
    pub is_head: bool,
}

/// Blocking, structured repository API. Called from `spawn_blocking`.
pub trait RepositoryAdapter: Send + Sync {
    fn snapshot(&self, dir: &Path) -> Result<RepositorySnapshot, AdapterError>;
    fn branches(&self, dir: &Path) -> Result<Vec<AdapterBranch>, AdapterError>;
    fn checkout(&self, dir: &Path, branch: &str) -> Result<(), AdapterError>;
    fn create_branch(
        &self,
        dir: &Path,
        name: &str,
        start: Option<&str>,
        checkout: bool,
    ) -> Result<(), AdapterError>;
    fn delete_branch(&self, dir: &Path, name: &str, force: bool) -> Result<(), AdapterError>;
    fn get_config(&self, dir: &Path, key: &str) -> Result<Option<String>, AdapterError>;
    fn set_config(&self, dir: &Path, key: &str, value: &str) -> Result<(), AdapterError>;
    /// Blob contents of `path` at `revision`, or in the index when `revision` is `None`.
    fn show(
        &self,
        dir: &Path,
        revision: Option<&str>,
        path: &str,
    ) -> Result<Option<String>, AdapterError>;
}

type HeadState = (Option<String>, Option<String>, u32, u32);

#[derive(Debug, Clone, Copy, Default)]
pub struct Git2Adapter;

impl Git2Adapter {
    fn open(dir: &Path) -> Result<Repository, AdapterError> {
        Ok(Repository::discover(dir)?)
    }

    fn head_state(repo: &Repository) -> Result<HeadState, AdapterError> {
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                let unborn = repo
                    .find_reference("HEAD")
                    .ok()
                    .and_then(|r| r.symbolic_target().map(str::to_string))
                    .map(|t| t.trim_start_matches("refs/heads/").to_string());
                return Ok((unborn, None, 0, 0));
            }
            Err(e) => return Err(e.into()),
        };
        if !head.is_branch() {
            return Ok((None, None, 0, 0));
        }
        let name = head.shorthand().map(str::to_string);
        let local_oid = head.target();
        let branch = Branch::wrap(head);
        let Ok(upstream) = branch.upstream() else {
            return Ok((name, None, 0, 0));
        };
        let upstream_name = upstream.name()?.map(str::to_string);
        let (ahead, behind) = match (local_oid, upstream.get().target()) {
            (Some(local), Some(remote)) => repo.graph_ahead_behind(local, remote)?,
            _ => (0, 0),
        };
        Ok((name, upstream_name, ahead as u32, behind as u32))
    }

    fn conflict_kinds(repo: &Repository) -> Result<HashMap<String, ChangeStatus>, AdapterError> {
        let mut kinds = HashMap::new();
        let index = repo.index()?;
        if !index.has_conflicts() {
            return Ok(kinds);
        }
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let Some(entry) = conflict
                .our
                .as_ref()
                .or(conflict.their.as_ref())
                .or(conflict.ancestor.as_ref())
            else {
                continue;
            };
            let path = String::from_utf8_lossy(&entry.path).into_owned();
            let kind = match (
                conflict.ancestor.is_some(),
                conflict.our.is_some(),
                conflict.their.is_some(),
            ) {
                (true, true, true) => ChangeStatus::BothModified,
                (false, true, true) => ChangeStatus::BothAdded,
                (true, false, false) => ChangeStatus::BothDeleted,
                (true, true, false) => ChangeStatus::DeletedByThem,
                (true, false, true) => ChangeStatus::DeletedByUs,
                (false, true, false) => ChangeStatus::AddedByUs,
                (false, false, true) => ChangeStatus::AddedByThem,
                (false, false, false) => ChangeStatus::Unknown,
            };
            kinds.insert(path, kind);
        }
        Ok(kinds)
    }
}

fn entry_path(entry: &StatusEntry<'_>) -> Option<String> {
    let s = entry.status();
    let renamed = if s.contains(Status::INDEX_RENAMED) {
        entry.head_to_index().and_then(|d| d.new_file().path().map(Path::to_path_buf))
    } else if s.contains(Status::WT_RENAMED) {
        entry.index_to_workdir().and_then(|d| d.new_file().path().map(Path::to_path_buf))
    } else {
        None
    };
    match renamed {
        Some(p) => Some(p.to_string_lossy().replace('\\', "/")),
        None => entry.path().map(str::to_string),
    }
}

fn index_status(s: Status) -> Option<ChangeStatus> {
    if s.contains(Status::INDEX_NEW) {
        Some(ChangeStatus::IndexAdded)
    } else if s.contains(Status::INDEX_MODIFIED) {
        Some(ChangeStatus::IndexModified)
    } else if s.contains(Status::INDEX_DELETED) {
        Some(ChangeStatus::IndexDeleted)
    } else if s.contains(Status::INDEX_RENAMED) {
        Some(ChangeStatus::IndexRenamed)
    } else if s.contains(Status::INDEX_TYPECHANGE) {
        Some(ChangeStatus::TypeChanged)
    } else {
        None
    }
}

fn worktree_status(s: Status) -> Option<ChangeStatus> {
    if s.contains(Status::WT_NEW) {
        Some(ChangeStatus::Untracked)
    } else if s.contains(Status::WT_MODIFIED) {
        Some(ChangeStatus::Modified)
    } else if s.contains(Status::WT_DELETED) {
        Some(ChangeStatus::Deleted)
    } else if s.contains(Status::WT_RENAMED) {
        Some(ChangeStatus::IntentToRename)
    } else if s.contains(Status::WT_TYPECHANGE) {
        Some(ChangeStatus::TypeChanged)
    } else if s.contains(Status::IGNORED) {
        Some(ChangeStatus::Ignored)
    } else {
        None
    }
}

impl RepositoryAdapter for Git2Adapter {
    fn snapshot(&self, dir: &Path) -> Result<RepositorySnapshot, AdapterError> {
        let repo = Self::open(dir)?;
        let (head, upstream, ahead, behind) = Self::head_state(&repo)?;
        let conflicts = Self::conflict_kinds(&repo)?;

        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false)
            .renames_head_to_index(true);
        let statuses = repo.statuses(Some(&mut opts))?;

        let mut snapshot = RepositorySnapshot {
            head,
            upstream,
            ahead,
            behind,
            ..Default::default()
        };
        for entry in statuses.iter() {
            let Some(path) = entry_path(&entry) else {
                continue;
            };
            let s = entry.status();
            if s.is_conflicted() {
                let status = conflicts
                    .get(&path)
                    .copied()
                    .unwrap_or(ChangeStatus::BothModified);
                snapshot.merge_changes.push(AdapterChange { path, status });
                continue;
            }
            if let Some(status) = index_status(s) {
                snapshot.index_changes.push(AdapterChange {
                    path: path.clone(),
                    status,
                });
            }
            if let Some(status) = worktree_status(s) {
                snapshot
                    .working_tree_changes
                    .push(AdapterChange { path, status });
            }
        }
        Ok(snapshot)
    }

    fn branches(&self, dir: &Path) -> Result<Vec<AdapterBranch>, AdapterError> {
        let repo = Self::open(dir)?;
        let mut out = Vec::new();
        for item in repo.branches(None)? {
            let (branch, kind) = item?;
            let Some(name) = branch.name()?.map(str::to_string) else {
                continue;
            };
            if kind == BranchType::Remote && name.ends_with("/HEAD") {
                continue;
            }
            let Some(oid) = branch.get().target() else {
                continue;
            };
            let commit = repo.find_commit(oid)?;
            let short = commit
                .as_object()
                .short_id()?
                .as_str()
                .unwrap_or_default()
                .to_string();
            let upstream = match kind {
                BranchType::Local => branch
                    .upstream()
                    .ok()
                    .and_then(|u| u.name().ok().flatten().map(str::to_string)),
                BranchType::Remote => None,
            };
            out.push(AdapterBranch {
                name,
                is_remote: kind == BranchType::Remote,
                commit: short,
                subject: commit.summary().unwrap_or_default().to_string(),
                upstream,
                is_head: branch.is_head(),
            });
        }
        Ok(out)
    }

    fn checkout(&self, dir: &Path, branch: &str) -> Result<(), AdapterError> {
        let repo = Self::open(dir)?;
        let reference = repo.find_branch(branch, BranchType::Local)?.into_reference();
        let refname = reference
            .name()
            .ok_or_else(|| AdapterError::Refused(format!("branch {branch} has a non UTF-8 name")))?
            .to_string();
        let target = reference.peel(ObjectType::Commit)?;
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        repo.checkout_tree(&target, Some(&mut checkout))?;
        repo.set_head(&refname)?;
        Ok(())
    }

    fn create_branch(
        &self,
        dir: &Path,
        name: &str,
        start: Option<&str>,
        checkout: bool,
    ) -> Result<(), AdapterError> {
        let repo = Self::open(dir)?;
        let target = match start {
            Some(rev) => repo.revparse_single(rev)?.peel_to_commit()?,
            None => repo.head()?.peel_to_commit()?,
        };
        let mut branch = repo.branch(name, &target, false)?;
        if checkout && let Err(e) = self.checkout(dir, name) {
            // Leave nothing behind so the CLI fallback can create it cleanly.
            let _ = branch.delete();
            return Err(e);
        }
        Ok(())
    }

    fn delete_branch(&self, dir: &Path, name: &str, force: bool) -> Result<(), AdapterError> {
        let repo = Self::open(dir)?;
        let mut branch = repo.find_branch(name, BranchType::Local)?;
        if branch.is_head() {
            return Err(AdapterError::Refused(format!(
                "cannot delete branch '{name}' while it is checked out"
            )));
        }
        if !force {
            let tip = branch.get().target();
            let head = repo.head()?.target();
            let merged = match (tip, head) {
                (Some(tip), Some(head)) => tip == head || repo.graph_descendant_of(head, tip)?,
                _ => false,
            };
            if !merged {
                return Err(AdapterError::Refused(format!(
                    "branch '{name}' is not fully merged"
                )));
            }
        }
        branch.delete()?;
        Ok(())
    }

    fn get_config(&self, dir: &Path, key: &str) -> Result<Option<String>, AdapterError> {
        let repo = Self::open(dir)?;
        match repo.config()?.get_string(key) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_config(&self, dir: &Path, key: &str, value: &str) -> Result<(), AdapterError> {
        let repo = Self::open(dir)?;
        let mut local = repo.config()?.open_level(ConfigLevel::Local)?;
        local.set_str(key, value)?;
        Ok(())
    }

    fn show(
        &self,
        dir: &Path,
        revision: Option<&str>,
        path: &str,
    ) -> Result<Option<String>, AdapterError> {
        let repo = Self::open(dir)?;
        let blob = match revision {
            Some(rev) => match repo.revparse_single(&format!("{rev}:{path}")) {
                Ok(obj) => obj.peel_to_blob()?,
                Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            },
            None => {
                let index = repo.index()?;
                let Some(entry) = index.get_path(Path::new(path), 0) else {
                    return Ok(None);
                };
                repo.find_blob(entry.id)?
            }
        };
        Ok(Some(String::from_utf8_lossy(blob.content()).into_owned()))
    }
}

pub type AdapterFactory =
    Arc<dyn Fn() -> Result<Arc<dyn RepositoryAdapter>, AdapterError> + Send + Sync>;

/// Process-wide owner of the structured adapter.
///
/// The adapter is built lazily on first use and dropped when the service is
/// disabled. Enablement changes are published on a watch channel.
pub struct AdapterService {
    factory: AdapterFactory,
    enabled: watch::Sender<bool>,
    instance: Mutex<Option<Arc<dyn RepositoryAdapter>>>,
}

impl AdapterService {
    pub fn new(enabled: bool) -> Self {
        Self::with_factory(
            enabled,
            Arc::new(|| Ok::<_, AdapterError>(Arc::new(Git2Adapter) as Arc<dyn RepositoryAdapter>)),
        )
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn with_factory(enabled: bool, factory: AdapterFactory) -> Self {
        let (tx, _rx) = watch::channel(enabled);
        Self {
            factory,
            enabled: tx,
            instance: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    /// Returns the adapter, constructing it if needed. `None` when disabled or
    /// when construction fails; a failed construction is retried next call.
    pub fn get_or_init(&self) -> Option<Arc<dyn RepositoryAdapter>> {
        if !self.is_enabled() {
            return None;
        }
        let mut slot = self.instance.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(adapter) = slot.as_ref() {
            return Some(adapter.clone());
        }
        match (self.factory)() {
            Ok(adapter) => {
                *slot = Some(adapter.clone());
                Some(adapter)
            }
            Err(e) => {
                tracing::debug!("Structured adapter unavailable: {e}");
                None
            }
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        if !enabled {
            self.instance
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }
        let changed = self.enabled.send_if_modified(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        });
        if changed {
            tracing::info!(enabled, "Structured adapter enablement changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.enabled.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn status_codes_follow_porcelain_letters() {
        use ChangeStatus::*;
        let table = [
            (IndexModified, 'M'),
            (Modified, 'M'),
            (IndexAdded, 'A'),
            (IntentToAdd, 'A'),
            (IndexDeleted, 'D'),
            (Deleted, 'D'),
            (IndexRenamed, 'R'),
            (IntentToRename, 'R'),
            (IndexCopied, 'C'),
            (Untracked, '?'),
            (Ignored, '!'),
            (TypeChanged, 'T'),
            (AddedByUs, 'U'),
            (AddedByThem, 'U'),
            (DeletedByUs, 'U'),
            (DeletedByThem, 'U'),
            (BothAdded, 'U'),
            (BothDeleted, 'U'),
            (BothModified, 'U'),
            (Unknown, ' '),
        ];
        for (status, code) in table {
            assert_eq!(status.code(), code, "{status:?}");
        }
    }

    #[test]
    fn disabled_service_yields_nothing() {
        let service = AdapterService::disabled();
        assert!(service.get_or_init().is_none());
    }

    #[test]
    fn instance_is_memoized_and_dropped_on_disable() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let service = AdapterService::with_factory(
            true,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AdapterError>(Arc::new(Git2Adapter) as Arc<dyn RepositoryAdapter>)
            }),
        );
        let mut rx = service.subscribe();

        let a = service.get_or_init().unwrap();
        let b = service.get_or_init().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        service.set_enabled(false);
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
        assert!(service.get_or_init().is_none());

        service.set_enabled(true);
        assert!(service.get_or_init().is_some());
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_construction_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let service = AdapterService::with_factory(
            true,
            Arc::new(move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AdapterError::Refused("not ready".into()))
                } else {
                    Ok(Arc::new(Git2Adapter) as Arc<dyn RepositoryAdapter>)
                }
            }),
        );
        assert!(service.get_or_init().is_none());
        assert!(service.get_or_init().is_some());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn snapshot_separates_index_and_worktree_changes() {
        let td = tempfile::TempDir::new().unwrap();
        let repo = Repository::init(td.path()).unwrap();
        let mut cfg = repo.config().unwrap();
        cfg.set_str("user.name", "Test User").unwrap();
        cfg.set_str("user.email", "test@example.com").unwrap();

        std::fs::write(td.path().join("tracked.txt"), "one\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("tracked.txt")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = repo.signature().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();

        std::fs::write(td.path().join("tracked.txt"), "two\n").unwrap();
        std::fs::write(td.path().join("staged.txt"), "new\n").unwrap();
        index.add_path(Path::new("staged.txt")).unwrap();
        index.write().unwrap();
        std::fs::write(td.path().join("loose.txt"), "?\n").unwrap();

        let snap = Git2Adapter.snapshot(td.path()).unwrap();
        assert!(snap.head.is_some());
        assert_eq!(
            snap.index_changes,
            vec![AdapterChange {
                path: "staged.txt".into(),
                status: ChangeStatus::IndexAdded
            }]
        );
        let mut wt: Vec<_> = snap
            .working_tree_changes
            .iter()
            .map(|c| (c.path.as_str(), c.status.code()))
            .collect();
        wt.sort();
        assert_eq!(wt, vec![("loose.txt", '?'), ("tracked.txt", 'M')]);
        assert!(snap.merge_changes.is_empty());
    }
}
