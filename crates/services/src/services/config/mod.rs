use std::path::{Path, PathBuf};

use git::{is_valid_branch_prefix, ssh_command_for_key};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utils::path::default_data_dir;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub const DEFAULT_BRANCH_PREFIX: &str = "openchamber";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-user data root; `None` means the platform default.
    pub data_dir: Option<PathBuf>,
    pub structured_adapter_enabled: bool,
    pub ssh_key_path: Option<PathBuf>,
    pub branch_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            structured_adapter_enabled: true,
            ssh_key_path: None,
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
        }
    }
}

impl Config {
    pub fn data_root(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_branch_prefix(&self.branch_prefix) {
            return Err(ConfigError::ValidationError(format!(
                "invalid branch prefix: {}",
                self.branch_prefix
            )));
        }
        if let Some(key) = &self.ssh_key_path {
            ssh_command_for_key(key)
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }
        Ok(())
    }
}

/// Will always return config, falling back to defaults
pub async fn load_config_from_file(config_path: &Path) -> Config {
    let raw_config = match tokio::fs::read_to_string(config_path).await {
        Ok(raw) => raw,
        Err(_) => {
            tracing::info!("No config file found at {}, using defaults", config_path.display());
            return Config::default();
        }
    };
    match serde_json::from_str::<Config>(&raw_config) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Failed to parse config at {}: {e}", config_path.display());
            Config::default()
        }
    }
}

/// Saves the config to the given path
pub async fn save_config_to_file(config: &Config, config_path: &Path) -> Result<(), ConfigError> {
    let raw_config = serde_json::to_string_pretty(config)?;
    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(config_path, raw_config).await?;
    Ok(())
}
