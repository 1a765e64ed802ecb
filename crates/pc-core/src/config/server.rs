//! Server configuration

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Configuration shared by the SSH server, the command router and the hooks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PcomposeConfig {
    /// Address to bind the SSH server to
    pub ssh_address: String,

    /// Path to the host key file
    pub host_key_path: PathBuf,

    /// Directory that holds the bare repositories and deployments
    pub data_directory: PathBuf,

    /// Container that routes external traffic into project networks
    pub frontend_container_name: String,

    /// Container that has the orchestration tooling installed
    pub pcompose_container_name: String,

    /// Require authentication for SSH connections
    pub authentication: bool,

    /// Password accepted for password authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication_password: Option<String>,

    /// Directory of public key files accepted for key authentication
    pub authentication_keys_directory: PathBuf,

    /// Maximum number of concurrent connections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,

    /// Idle time after which a connection is dropped
    #[serde(with = "duration_secs")]
    pub inactivity_timeout: Duration,

    /// Delay before answering a rejected authentication attempt
    #[serde(with = "duration_secs")]
    pub auth_rejection_time: Duration,

    /// Verbose request logging
    pub debug: bool,

    /// External tool binaries
    pub tools: ToolsConfig,
}

impl Default for PcomposeConfig {
    fn default() -> Self {
        Self {
            ssh_address: "localhost:2222".to_string(),
            host_key_path: PathBuf::from("deploy/keys/ssh_key"),
            data_directory: PathBuf::from("deploy/data/"),
            frontend_container_name: "nginx-proxy".to_string(),
            pcompose_container_name: "pcompose".to_string(),
            authentication: false,
            authentication_password: None,
            authentication_keys_directory: PathBuf::from("deploy/pubkeys/"),
            max_connections: None,
            inactivity_timeout: Duration::from_secs(20 * 60),
            auth_rejection_time: Duration::from_secs(1),
            debug: false,
            tools: ToolsConfig::default(),
        }
    }
}

impl PcomposeConfig {
    /// Resolve relative paths against `base`
    ///
    /// Hooks run with the repository as working directory, so the
    /// configuration handed to them must not depend on the server's cwd.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        for path in [
            &mut self.data_directory,
            &mut self.host_key_path,
            &mut self.authentication_keys_directory,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    /// Resolve relative paths against the current working directory
    pub fn resolved(self) -> io::Result<Self> {
        let cwd = std::env::current_dir()?;
        Ok(self.resolve_paths(&cwd))
    }

    /// Path of the configuration file written for hooks
    pub fn hooks_config_file(&self) -> PathBuf {
        self.data_directory.join(crate::HOOKS_CONFIG_FILE)
    }

    /// Copy handed to hooks, without credentials
    pub fn for_hooks(&self) -> Self {
        Self {
            authentication_password: None,
            ..self.clone()
        }
    }
}

/// Names of the external tools pcompose shells out to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Container runtime CLI
    pub docker: String,
    /// Orchestration CLI
    pub compose: String,
    /// Git CLI
    pub git: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            docker: "docker".to_string(),
            compose: "docker-compose".to_string(),
            git: "git".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PcomposeConfig::default();
        assert_eq!(config.ssh_address, "localhost:2222");
        assert_eq!(config.frontend_container_name, "nginx-proxy");
        assert_eq!(config.pcompose_container_name, "pcompose");
        assert!(!config.authentication);
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = PcomposeConfig::default();
        config.data_directory = PathBuf::from("data");
        config.host_key_path = PathBuf::from("/etc/pcompose/key");

        let config = config.resolve_paths(Path::new("/srv"));
        assert_eq!(config.data_directory, PathBuf::from("/srv/data"));
        assert_eq!(config.host_key_path, PathBuf::from("/etc/pcompose/key"));
        assert_eq!(
            config.hooks_config_file(),
            PathBuf::from("/srv/data/hooks.toml")
        );
    }

    #[test]
    fn test_hook_copy_drops_password() {
        let mut config = PcomposeConfig::default();
        config.authentication = true;
        config.authentication_password = Some("hunter2".to_string());
        config.data_directory = PathBuf::from("/srv/data");

        let hooks = config.for_hooks();
        assert_eq!(hooks.authentication_password, None);
        assert_eq!(hooks.data_directory, config.data_directory);

        let written = toml::to_string(&hooks).unwrap();
        assert!(!written.contains("hunter2"));
        assert!(!written.contains("authentication_password"));
    }
}
