use axum::{
    Json, Router,
    extract::State,
    response::Json as ResponseJson,
    routing::get,
};
use services::services::config::{Config, save_config_to_file};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

pub fn router() -> Router<AppState> {
    Router::new().route("/config", get(get_config).put(update_config))
}

async fn get_config(State(state): State<AppState>) -> ResponseJson<ApiResponse<Config>> {
    let config = state.config().read().await.clone();
    ResponseJson(ApiResponse::success(config))
}

/// Replace the stored config. The adapter toggle and branch prefix apply
/// immediately; the data directory and SSH key are read at startup.
async fn update_config(
    State(state): State<AppState>,
    Json(new_config): Json<Config>,
) -> Result<ResponseJson<ApiResponse<Config>>, ApiError> {
    new_config.validate()?;

    let old_config = state.config().read().await.clone();
    save_config_to_file(&new_config, state.config_path()).await?;
    *state.config().write().await = new_config.clone();

    if old_config.structured_adapter_enabled != new_config.structured_adapter_enabled {
        state
            .git()
            .adapter()
            .set_enabled(new_config.structured_adapter_enabled);
    }
    if old_config.data_dir != new_config.data_dir
        || old_config.ssh_key_path != new_config.ssh_key_path
    {
        tracing::info!("Data directory or SSH key changed; restart to apply");
    }

    Ok(ResponseJson(ApiResponse::success(new_config)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use git::{AdapterService, GitCli, GitService};
    use services::services::{config::load_config_from_file, project::InMemoryProjectStore};
    use tempfile::TempDir;

    use super::*;

    fn state(td: &TempDir) -> AppState {
        let git = GitService::new(GitCli::new(), Arc::new(AdapterService::new(true)));
        AppState::from_parts(
            git,
            Arc::new(InMemoryProjectStore::default()),
            Config::default(),
            td.path().join("config.json"),
        )
    }

    #[tokio::test]
    async fn update_persists_and_publishes_adapter_toggle() {
        let td = TempDir::new().unwrap();
        let state = state(&td);
        let mut enabled = state.git().adapter().subscribe();

        let new_config = Config {
            structured_adapter_enabled: false,
            branch_prefix: "wt".into(),
            ..Default::default()
        };
        update_config(State(state.clone()), Json(new_config.clone()))
            .await
            .unwrap();

        assert!(enabled.has_changed().unwrap());
        assert!(!*enabled.borrow_and_update());
        assert!(!state.git().adapter().is_enabled());
        assert_eq!(
            load_config_from_file(state.config_path()).await,
            new_config
        );
        let ResponseJson(current) = get_config(State(state)).await;
        assert_eq!(current.into_data().unwrap().branch_prefix, "wt");
    }

    #[tokio::test]
    async fn invalid_prefix_is_rejected_without_saving() {
        let td = TempDir::new().unwrap();
        let state = state(&td);
        let err = update_config(
            State(state.clone()),
            Json(Config {
                branch_prefix: "bad prefix".into(),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
        assert!(!state.config_path().exists());
    }
}
