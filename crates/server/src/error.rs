use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use git::GitServiceError;
use services::services::{
    config::ConfigError,
    worktree_manager::{ValidationIssue, WorktreeError},
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    GitService(#[from] GitServiceError),
    #[error(transparent)]
    Worktree(#[from] WorktreeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::GitService(err) => match err {
                GitServiceError::InvalidRepository(_)
                | GitServiceError::InvalidBranchName(_)
                | GitServiceError::InvalidArgument(_)
                | GitServiceError::InvalidPath(_)
                | GitServiceError::Credential(_) => (StatusCode::BAD_REQUEST, "GitServiceError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "GitServiceError"),
            },
            ApiError::Worktree(err) => match err {
                WorktreeError::Validation(_) => (StatusCode::CONFLICT, "WorktreeValidationError"),
                WorktreeError::CannotRemovePrimary => (StatusCode::BAD_REQUEST, "WorktreeError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "WorktreeError"),
            },
            ApiError::Config(ConfigError::ValidationError(_)) => {
                (StatusCode::BAD_REQUEST, "ConfigError")
            }
            ApiError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ConfigError"),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IoError"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = self.status();
        if status_code.is_server_error() {
            tracing::error!(error_type, "Request failed: {self}");
        }

        match self {
            ApiError::Worktree(WorktreeError::Validation(issue)) => {
                let response =
                    ApiResponse::<(), ValidationIssue>::error_with_data(&issue.message, issue.clone());
                (status_code, Json(response)).into_response()
            }
            other => {
                let error_message = match &other {
                    ApiError::BadRequest(msg) => msg.clone(),
                    ApiError::Worktree(_) | ApiError::GitService(_) => other.to_string(),
                    _ => format!("{}: {}", error_type, other),
                };
                let response = ApiResponse::<()>::error(&error_message);
                (status_code, Json(response)).into_response()
            }
        }
    }
}
