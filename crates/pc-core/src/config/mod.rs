//! Configuration management for pcompose

mod serde_utils;
mod server;

pub use server::{PcomposeConfig, ToolsConfig};

use crate::error::ConfigError;
use crate::{HOOKS_CONFIG_FILE, HOOKS_DIR_NAME};
use std::path::{Path, PathBuf};

/// Get the default configuration file path (relative to the working directory)
pub fn default_config_path() -> PathBuf {
    PathBuf::from("config.toml")
}

/// Path of the configuration file a hook reads, relative to its repository
pub fn hooks_config_path(repo_dir: &Path) -> PathBuf {
    repo_dir.join(HOOKS_DIR_NAME).join(HOOKS_CONFIG_FILE)
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}
