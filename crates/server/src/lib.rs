use std::{path::PathBuf, sync::Arc};

use git::{AdapterService, GitCli, GitService};
use services::services::{
    config::Config,
    project::{JsonProjectStore, ProjectStore},
    worktree_manager::WorktreeManager,
};
use tokio::sync::RwLock;

pub mod error;
pub mod routes;

/// Shared handles behind every route.
#[derive(Clone)]
pub struct AppState {
    git: GitService,
    store: Arc<dyn ProjectStore>,
    config: Arc<RwLock<Config>>,
    config_path: PathBuf,
    data_root: PathBuf,
}

impl AppState {
    /// The data root and SSH key are fixed here; changing them takes effect on restart.
    pub fn new(config: Config, config_path: PathBuf) -> Self {
        let cli = GitCli::new().with_ssh_key(config.ssh_key_path.clone());
        let adapter = Arc::new(AdapterService::new(config.structured_adapter_enabled));
        let data_root = config.data_root();
        let store: Arc<dyn ProjectStore> = Arc::new(JsonProjectStore::new(&data_root));
        Self::from_parts(GitService::new(cli, adapter), store, config, config_path)
    }

    pub fn from_parts(
        git: GitService,
        store: Arc<dyn ProjectStore>,
        config: Config,
        config_path: PathBuf,
    ) -> Self {
        let data_root = config.data_root();
        Self {
            git,
            store,
            config: Arc::new(RwLock::new(config)),
            config_path,
            data_root,
        }
    }

    pub fn git(&self) -> &GitService {
        &self.git
    }

    pub fn config(&self) -> &Arc<RwLock<Config>> {
        &self.config
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Manager bound to the branch prefix currently configured.
    pub async fn worktrees(&self) -> WorktreeManager {
        let prefix = self.config.read().await.branch_prefix.clone();
        WorktreeManager::new(
            self.git.clone(),
            self.store.clone(),
            self.data_root.clone(),
            prefix,
        )
    }
}
