use std::path::PathBuf;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{delete, get, post},
};
use git::{
    BranchSummary, CommitFile, CommitRequest, CommitResult, DiffOptions, FileDiff, GitIdentity,
    IdentityUpdate, LogOptions, LogResult, OperationOutcome, PullResult, PushOptions, PushResult,
    RemoteOptions, StashOptions, StatusResult,
};
use serde::Deserialize;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError, routes::DirectoryQuery};

type ApiResult<T> = Result<ResponseJson<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct CreateBranchRequest {
    pub name: String,
    pub start_point: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteBranchRequest {
    pub name: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRemoteBranchRequest {
    pub remote: Option<String>,
    pub branch: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub branch: String,
}

#[derive(Debug, Deserialize)]
pub struct RevertRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub branch: String,
}

#[derive(Debug, Deserialize)]
pub struct RebaseRequest {
    pub onto: String,
}

#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    pub directory: PathBuf,
    pub path: Option<String>,
    #[serde(default)]
    pub staged: bool,
    pub context_lines: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct FileDiffQuery {
    pub directory: PathBuf,
    pub path: String,
    #[serde(default)]
    pub staged: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub directory: PathBuf,
    pub max_count: Option<u32>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub file: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/git/status", get(get_status))
        .route(
            "/git/branches",
            get(get_branches).post(create_branch).delete(delete_branch),
        )
        .route("/git/checkout", post(checkout_branch))
        .route("/git/remote-branches", delete(delete_remote_branch))
        .route("/git/diff", get(get_diff))
        .route("/git/file-diff", get(get_file_diff))
        .route("/git/revert", post(revert_file))
        .route("/git/commit", post(commit))
        .route("/git/push", post(push))
        .route("/git/pull", post(pull))
        .route("/git/fetch", post(fetch))
        .route("/git/merge", post(merge))
        .route("/git/merge/continue", post(continue_merge))
        .route("/git/merge/abort", post(abort_merge))
        .route("/git/rebase", post(rebase))
        .route("/git/rebase/continue", post(continue_rebase))
        .route("/git/rebase/abort", post(abort_rebase))
        .route("/git/stash", post(stash))
        .route("/git/stash/pop", post(stash_pop))
        .route("/git/log", get(get_log))
        .route("/git/commits/{hash}/files", get(get_commit_files))
        .route("/git/identity", get(get_identity).put(set_identity))
}

pub async fn get_status(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<StatusResult> {
    let status = state.git().get_status(&query.directory).await?;
    Ok(ResponseJson(ApiResponse::success(status)))
}

pub async fn get_branches(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<BranchSummary> {
    let branches = state.git().get_branches(&query.directory).await?;
    Ok(ResponseJson(ApiResponse::success(branches)))
}

pub async fn create_branch(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<CreateBranchRequest>,
) -> ApiResult<()> {
    state
        .git()
        .create_branch(
            &query.directory,
            &payload.name,
            payload.start_point.as_deref(),
        )
        .await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn delete_branch(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<DeleteBranchRequest>,
) -> ApiResult<()> {
    state
        .git()
        .delete_branch(&query.directory, &payload.name, payload.force)
        .await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn delete_remote_branch(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<DeleteRemoteBranchRequest>,
) -> ApiResult<()> {
    state
        .git()
        .delete_remote_branch(&query.directory, payload.remote.as_deref(), &payload.branch)
        .await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn checkout_branch(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<CheckoutRequest>,
) -> ApiResult<()> {
    state
        .git()
        .checkout_branch(&query.directory, &payload.branch)
        .await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn get_diff(
    State(state): State<AppState>,
    Query(query): Query<DiffQuery>,
) -> ApiResult<String> {
    let opts = DiffOptions {
        path: query.path,
        staged: query.staged,
        context_lines: query.context_lines,
    };
    let diff = state.git().get_diff(&query.directory, &opts).await?;
    Ok(ResponseJson(ApiResponse::success(diff)))
}

pub async fn get_file_diff(
    State(state): State<AppState>,
    Query(query): Query<FileDiffQuery>,
) -> ApiResult<FileDiff> {
    let diff = state
        .git()
        .get_file_diff(&query.directory, &query.path, query.staged)
        .await?;
    Ok(ResponseJson(ApiResponse::success(diff)))
}

pub async fn revert_file(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<RevertRequest>,
) -> ApiResult<()> {
    state
        .git()
        .revert_file(&query.directory, &payload.path)
        .await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn commit(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<CommitRequest>,
) -> ApiResult<CommitResult> {
    let result = state.git().commit(&query.directory, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(result)))
}

pub async fn push(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<PushOptions>,
) -> ApiResult<PushResult> {
    let result = state.git().push(&query.directory, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(result)))
}

pub async fn pull(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<RemoteOptions>,
) -> ApiResult<PullResult> {
    let result = state.git().pull(&query.directory, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(result)))
}

pub async fn fetch(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<RemoteOptions>,
) -> ApiResult<()> {
    state.git().fetch(&query.directory, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn merge(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<MergeRequest>,
) -> ApiResult<OperationOutcome> {
    let outcome = state.git().merge(&query.directory, &payload.branch).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn continue_merge(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<OperationOutcome> {
    let outcome = state.git().continue_merge(&query.directory).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn abort_merge(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<OperationOutcome> {
    let outcome = state.git().abort_merge(&query.directory).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn rebase(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<RebaseRequest>,
) -> ApiResult<OperationOutcome> {
    let outcome = state.git().rebase(&query.directory, &payload.onto).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn continue_rebase(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<OperationOutcome> {
    let outcome = state.git().continue_rebase(&query.directory).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn abort_rebase(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<OperationOutcome> {
    let outcome = state.git().abort_rebase(&query.directory).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn stash(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<StashOptions>,
) -> ApiResult<()> {
    state.git().stash(&query.directory, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn stash_pop(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<OperationOutcome> {
    let outcome = state.git().stash_pop(&query.directory).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn get_log(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<LogResult> {
    let opts = LogOptions {
        max_count: query.max_count,
        from: query.from,
        to: query.to,
        file: query.file,
    };
    let log = state.git().get_log(&query.directory, &opts).await?;
    Ok(ResponseJson(ApiResponse::success(log)))
}

pub async fn get_commit_files(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<Vec<CommitFile>> {
    let files = state
        .git()
        .get_commit_files(&query.directory, &hash)
        .await?;
    Ok(ResponseJson(ApiResponse::success(files)))
}

pub async fn get_identity(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<GitIdentity> {
    let identity = state.git().get_identity(&query.directory).await?;
    Ok(ResponseJson(ApiResponse::success(identity)))
}

pub async fn set_identity(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Json(payload): Json<IdentityUpdate>,
) -> ApiResult<GitIdentity> {
    let git = state.git();
    git.set_identity(&query.directory, &payload).await?;
    let identity = git.get_identity(&query.directory).await?;
    Ok(ResponseJson(ApiResponse::success(identity)))
}
