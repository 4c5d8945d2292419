use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use git::{
    AdapterService, CommitRequest, CredentialResolver, DiffOptions, GitCli, GitService,
    GitServiceError, IdentityUpdate, LogOptions,
};
use git2::Repository;
use tempfile::TempDir;

fn cli() -> GitCli {
    GitCli::new().with_credentials(CredentialResolver::disabled())
}

fn services() -> [GitService; 2] {
    [
        GitService::new(cli(), Arc::new(AdapterService::new(true))),
        GitService::cli_only(cli()),
    ]
}

fn write_file<P: AsRef<Path>>(base: P, rel: &str, content: &str) {
    let path = base.as_ref().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut f = fs::File::create(&path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
}

fn init_repo(root: &TempDir) -> PathBuf {
    let path = root.path().join("repo");
    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(&path, &opts).unwrap();
    let mut cfg = repo.config().unwrap();
    cfg.set_str("user.name", "Test User").unwrap();
    cfg.set_str("user.email", "test@example.com").unwrap();
    dunce::canonicalize(path).unwrap()
}

fn commit_all(repo_path: &Path, message: &str) -> String {
    let repo = Repository::open(repo_path).unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = repo.signature().unwrap();
    let parents: Vec<git2::Commit> = match repo.head() {
        Ok(h) => vec![h.peel_to_commit().unwrap()],
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => vec![],
        Err(e) => panic!("failed to read HEAD: {e}"),
    };
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .unwrap()
        .to_string()
}

fn seeded_repo(root: &TempDir) -> PathBuf {
    let path = init_repo(root);
    write_file(&path, "README.md", "hello\n");
    commit_all(&path, "initial");
    path
}

#[tokio::test]
async fn status_agrees_between_adapter_and_cli() {
    let td = TempDir::new().unwrap();
    let repo = seeded_repo(&td);
    write_file(&repo, "README.md", "hello\nworld\n");
    write_file(&repo, "new/file.txt", "x\n");

    let [structured, cli_only] = services();
    let a = structured.get_status(&repo).await.unwrap();
    let b = cli_only.get_status(&repo).await.unwrap();

    for status in [&a, &b] {
        assert_eq!(status.current.as_deref(), Some("main"));
        assert!(!status.is_clean);
        let pairs: Vec<_> = status
            .files
            .iter()
            .map(|f| (f.path.as_str(), f.index, f.working_dir))
            .collect();
        assert_eq!(
            pairs,
            vec![("README.md", ' ', 'M'), ("new/file.txt", '?', '?')]
        );
        assert!(status.merge_in_progress.is_none());
        assert!(status.rebase_in_progress.is_none());
    }
}

#[tokio::test]
async fn commit_reports_real_line_counts() {
    let td = TempDir::new().unwrap();
    let repo = seeded_repo(&td);
    write_file(&repo, "a.txt", "one\ntwo\n");
    write_file(&repo, "README.md", "bye\n");

    let git = GitService::cli_only(cli());
    let result = git
        .commit(
            &repo,
            &CommitRequest {
                message: "second".into(),
                add_all: true,
                files: vec![],
            },
        )
        .await
        .unwrap();
    assert_eq!(result.branch.as_deref(), Some("main"));
    assert_eq!(result.summary.changes, 2);
    assert_eq!(result.summary.insertions, 3);
    assert_eq!(result.summary.deletions, 1);
    assert_eq!(git.head_commit(&repo).await, Some(result.commit));
    assert!(git.get_status(&repo).await.unwrap().is_clean);
}

#[tokio::test]
async fn empty_commit_message_is_rejected() {
    let td = TempDir::new().unwrap();
    let repo = seeded_repo(&td);
    let err = GitService::cli_only(cli())
        .commit(&repo, &CommitRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GitServiceError::InvalidArgument(_)));
}

#[tokio::test]
async fn branch_lifecycle() {
    for git in services() {
        let td = TempDir::new().unwrap();
        let repo = seeded_repo(&td);

        git.create_branch(&repo, "feature/x", None).await.unwrap();
        let summary = git.get_branches(&repo).await.unwrap();
        assert_eq!(summary.current.as_deref(), Some("feature/x"));
        assert!(summary.branches["feature/x"].current);
        assert!(!summary.branches["main"].current);
        assert_eq!(summary.branches["main"].label, "initial");

        git.checkout_branch(&repo, "main").await.unwrap();
        git.delete_branch(&repo, "feature/x", false).await.unwrap();
        let summary = git.get_branches(&repo).await.unwrap();
        assert_eq!(summary.all, vec!["main".to_string()]);

        assert!(matches!(
            git.create_branch(&repo, "bad name", None).await,
            Err(GitServiceError::InvalidBranchName(_))
        ));
    }
}

#[tokio::test]
async fn diffs_cover_tracked_and_untracked_files() {
    let td = TempDir::new().unwrap();
    let repo = seeded_repo(&td);
    write_file(&repo, "README.md", "hello\nmore\n");
    write_file(&repo, "fresh.txt", "brand new\n");

    for git in services() {
        let full = git.get_diff(&repo, &DiffOptions::default()).await.unwrap();
        assert!(full.contains("+more"));

        let untracked = git
            .get_diff(
                &repo,
                &DiffOptions {
                    path: Some("fresh.txt".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(untracked.contains("+brand new"));

        let file = git.get_file_diff(&repo, "README.md", false).await.unwrap();
        assert_eq!(file.original, "hello\n");
        assert_eq!(file.modified, "hello\nmore\n");

        let added = git.get_file_diff(&repo, "fresh.txt", false).await.unwrap();
        assert_eq!(added.original, "");

        assert!(matches!(
            git.get_file_diff(&repo, "../escape", false).await,
            Err(GitServiceError::InvalidPath(_))
        ));
    }
}

#[tokio::test]
async fn revert_handles_modified_untracked_and_staged_new_files() {
    let td = TempDir::new().unwrap();
    let repo = seeded_repo(&td);
    let git = GitService::cli_only(cli());

    write_file(&repo, "README.md", "changed\n");
    write_file(&repo, "scratch.txt", "tmp\n");
    write_file(&repo, "staged.txt", "staged\n");
    git.cli().git(&repo, ["add", "staged.txt"]).await.unwrap();

    git.revert_file(&repo, "README.md").await.unwrap();
    git.revert_file(&repo, "scratch.txt").await.unwrap();
    git.revert_file(&repo, "staged.txt").await.unwrap();

    assert_eq!(fs::read_to_string(repo.join("README.md")).unwrap(), "hello\n");
    assert!(!repo.join("scratch.txt").exists());
    assert!(!repo.join("staged.txt").exists());
    assert!(git.get_status(&repo).await.unwrap().is_clean);
}

#[tokio::test]
async fn log_and_commit_files() {
    let td = TempDir::new().unwrap();
    let repo = seeded_repo(&td);
    write_file(&repo, "src/lib.rs", "fn a() {}\n");
    let second = commit_all(&repo, "add lib");

    let git = GitService::cli_only(cli());
    let log = git.get_log(&repo, &LogOptions::default()).await.unwrap();
    assert_eq!(log.total, 2);
    let latest = log.latest.unwrap();
    assert_eq!(latest.hash, second);
    assert_eq!(latest.message, "add lib");
    assert_eq!(latest.author_email, "test@example.com");
    assert_eq!(latest.insertions, 1);

    let limited = git
        .get_log(
            &repo,
            &LogOptions {
                max_count: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(limited.total, 1);

    let files = git.get_commit_files(&repo, &second).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, "src/lib.rs");
    assert_eq!(files[0].change_type, git::ChangeType::Added);
    assert_eq!(files[0].insertions, 1);
    assert!(!files[0].is_binary);

    assert!(git.get_commit_files(&repo, "--all").await.is_err());
}

#[tokio::test]
async fn log_of_empty_repository_is_empty() {
    let td = TempDir::new().unwrap();
    let repo = init_repo(&td);
    let log = GitService::cli_only(cli())
        .get_log(&repo, &LogOptions::default())
        .await
        .unwrap();
    assert_eq!(log.total, 0);
    assert!(log.latest.is_none());
}

#[tokio::test]
async fn identity_round_trip_and_unsafe_key_rejection() {
    let td = TempDir::new().unwrap();
    let repo = seeded_repo(&td);

    for git in services() {
        git.set_identity(
            &repo,
            &IdentityUpdate {
                user_name: Some("Ada".into()),
                user_email: Some("ada@example.com".into()),
                ssh_key_path: Some(PathBuf::from("/home/ada/.ssh/id_ed25519")),
            },
        )
        .await
        .unwrap();
        let identity = git.get_identity(&repo).await.unwrap();
        assert_eq!(identity.user_name.as_deref(), Some("Ada"));
        assert_eq!(identity.user_email.as_deref(), Some("ada@example.com"));
        assert_eq!(
            identity.ssh_command.as_deref(),
            Some("ssh -i \"/home/ada/.ssh/id_ed25519\" -o IdentitiesOnly=yes")
        );

        let err = git
            .set_identity(
                &repo,
                &IdentityUpdate {
                    user_name: Some("Mallory".into()),
                    ssh_key_path: Some(PathBuf::from("/tmp/k; rm -rf ~")),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GitServiceError::Credential(_)));
        assert_eq!(
            git.get_identity(&repo).await.unwrap().user_name.as_deref(),
            Some("Ada")
        );
    }
}

#[tokio::test]
async fn linked_worktree_context_points_at_primary() {
    let td = TempDir::new().unwrap();
    let repo = seeded_repo(&td);
    let git = GitService::cli_only(cli());
    let wt = td.path().join("wt");

    git.add_worktree(&repo, &wt, Some("wt-branch"), "HEAD")
        .await
        .unwrap();
    git.reset_hard(&wt).await.unwrap();
    assert_eq!(fs::read_to_string(wt.join("README.md")).unwrap(), "hello\n");

    let ctx = git.resolve_repo_context(&wt).await.unwrap();
    assert_eq!(ctx.primary_worktree, repo);
    assert_eq!(ctx.common_dir, repo.join(".git"));
    assert_eq!(ctx.sandbox, dunce::canonicalize(&wt).unwrap());

    let worktrees = git.list_worktrees(&repo).await.unwrap();
    assert_eq!(worktrees.len(), 2);
    let linked = worktrees.iter().find(|w| w.name == "wt").unwrap();
    assert_eq!(linked.branch.as_deref(), Some("wt-branch"));

    git.remove_worktree(&repo, &wt).await.unwrap();
    assert!(!wt.exists());
    assert_eq!(git.list_worktrees(&repo).await.unwrap().len(), 1);
}

#[tokio::test]
async fn merge_conflict_is_reported_and_abortable() {
    let td = TempDir::new().unwrap();
    let repo = seeded_repo(&td);
    let git = GitService::cli_only(cli());

    git.create_branch(&repo, "feature", None).await.unwrap();
    write_file(&repo, "README.md", "feature side\n");
    commit_all(&repo, "feature change");
    git.checkout_branch(&repo, "main").await.unwrap();
    write_file(&repo, "README.md", "main side\n");
    commit_all(&repo, "main change");

    let outcome = git.merge(&repo, "feature").await.unwrap();
    assert!(outcome.conflict);
    assert_eq!(outcome.conflict_files, vec!["README.md".to_string()]);

    let status = git.get_status(&repo).await.unwrap();
    let merge = status.merge_in_progress.expect("merge should be in progress");
    assert!(!merge.head.is_empty());
    assert!(merge.message.unwrap().contains("feature"));

    let aborted = git.abort_merge(&repo).await.unwrap();
    assert!(aborted.success);
    let status = git.get_status(&repo).await.unwrap();
    assert!(status.merge_in_progress.is_none());
    assert!(status.is_clean);
}

#[tokio::test]
async fn rebase_conflict_exposes_rebase_state() {
    let td = TempDir::new().unwrap();
    let repo = seeded_repo(&td);
    let git = GitService::cli_only(cli());

    git.create_branch(&repo, "topic", None).await.unwrap();
    write_file(&repo, "README.md", "topic side\n");
    commit_all(&repo, "topic change");
    git.checkout_branch(&repo, "main").await.unwrap();
    write_file(&repo, "README.md", "main side\n");
    commit_all(&repo, "main change");
    git.checkout_branch(&repo, "topic").await.unwrap();

    let outcome = git.rebase(&repo, "main").await.unwrap();
    assert!(outcome.conflict);
    let rebase = git
        .get_status(&repo)
        .await
        .unwrap()
        .rebase_in_progress
        .expect("rebase should be in progress");
    assert_eq!(rebase.head_name.as_deref(), Some("topic"));
    assert!(rebase.onto.is_some());

    assert!(git.abort_rebase(&repo).await.unwrap().success);
    assert!(git.rebase_in_progress(&repo).await.is_none());
}
