use axum::{
    Json, Router,
    extract::{Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use git::WorktreeInfo;
use services::services::worktree_manager::{
    CreateWorktreeRequest, RemoveWorktreeRequest, ValidationResult,
};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError, routes::DirectoryQuery};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/git/worktrees",
            get(list_worktrees)
                .post(create_worktree)
                .delete(remove_worktree),
        )
        .route("/git/worktrees/validate", post(validate_worktree))
}

pub async fn list_worktrees(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<WorktreeInfo>>>, ApiError> {
    let worktrees = state.git().list_worktrees(&query.directory).await?;
    Ok(ResponseJson(ApiResponse::success(worktrees)))
}

pub async fn validate_worktree(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<CreateWorktreeRequest>,
) -> Result<ResponseJson<ApiResponse<ValidationResult>>, ApiError> {
    let result = state
        .worktrees()
        .await
        .validate(&query.directory, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success(result)))
}

pub async fn create_worktree(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<CreateWorktreeRequest>,
) -> Result<ResponseJson<ApiResponse<WorktreeInfo>>, ApiError> {
    let created = state
        .worktrees()
        .await
        .create(&query.directory, &payload)
        .await?;
    tracing::info!(path = ?created.path, branch = ?created.branch, "Worktree created");
    Ok(ResponseJson(ApiResponse::success(created)))
}

pub async fn remove_worktree(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<RemoveWorktreeRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state
        .worktrees()
        .await
        .remove(&query.directory, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Arc};

    use git::{CredentialResolver, GitCli, GitService};
    use git2::Repository;
    use services::services::{config::Config, project::InMemoryProjectStore};
    use tempfile::TempDir;

    use super::*;

    fn init_repo(path: &Path) {
        let mut opts = git2::RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(path, &opts).unwrap();
        let mut cfg = repo.config().unwrap();
        cfg.set_str("user.name", "Test User").unwrap();
        cfg.set_str("user.email", "test@example.com").unwrap();
        std::fs::write(path.join("README.md"), "hello\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = repo.signature().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
    }

    fn state(td: &TempDir) -> AppState {
        let git =
            GitService::cli_only(GitCli::new().with_credentials(CredentialResolver::disabled()));
        let config = Config {
            data_dir: Some(td.path().join("data")),
            branch_prefix: "wt".into(),
            ..Default::default()
        };
        AppState::from_parts(
            git,
            Arc::new(InMemoryProjectStore::default()),
            config,
            td.path().join("config.json"),
        )
    }

    #[tokio::test]
    async fn create_list_and_remove_through_handlers() {
        let td = TempDir::new().unwrap();
        let repo = td.path().join("repo");
        init_repo(&repo);
        let state = state(&td);
        let query = || DirectoryQuery {
            directory: repo.clone(),
        };

        let ResponseJson(created) = create_worktree(
            State(state.clone()),
            Query(query()),
            Json(CreateWorktreeRequest {
                worktree_name: Some("api".into()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        let created = created.into_data().unwrap();
        assert_eq!(created.branch.as_deref(), Some("wt/api"));

        let ResponseJson(listed) = list_worktrees(State(state.clone()), Query(query()))
            .await
            .unwrap();
        assert_eq!(listed.into_data().unwrap().len(), 2);

        remove_worktree(
            State(state.clone()),
            Query(query()),
            Json(RemoveWorktreeRequest {
                path: created.path.clone(),
                delete_local_branch: true,
            }),
        )
        .await
        .unwrap();
        assert!(!created.path.exists());
    }

    #[tokio::test]
    async fn create_with_taken_branch_is_a_validation_error() {
        let td = TempDir::new().unwrap();
        let repo = td.path().join("repo");
        init_repo(&repo);
        let state = state(&td);

        let err = create_worktree(
            State(state),
            Query(DirectoryQuery { directory: repo }),
            Json(CreateWorktreeRequest {
                branch_name: Some("main".into()),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Worktree(services::services::worktree_manager::WorktreeError::Validation(_))
        ));
    }
}
