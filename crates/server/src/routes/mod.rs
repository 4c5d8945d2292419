use std::path::PathBuf;

use axum::{
    Router,
    routing::{IntoMakeService, get},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod config;
pub mod health;
pub mod repo;
pub mod worktrees;

/// Every repository-scoped route names its repository with `?directory=`.
#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    pub directory: PathBuf,
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .merge(config::router())
        .merge(repo::router())
        .merge(worktrees::router())
}

pub fn router(state: AppState) -> IntoMakeService<Router> {
    Router::new()
        .nest("/api", api_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .into_make_service()
}
