//! Bare repository management
//!
//! Every push target lives at `<data>/<project>` as a bare repository whose
//! hooks are symlinks back to the pcompose executable. The executable
//! recognises hook mode from the name it was invoked under.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{hooks_config_path, PcomposeConfig};
use crate::error::RepositoryError;
use crate::tools::Git;
use crate::{HOOKS_DIR_NAME, HOOK_NAMES};

/// Creates bare repositories and installs their hooks
#[derive(Debug, Clone)]
pub struct RepositoryManager {
    config: Arc<PcomposeConfig>,
    hook_executable: PathBuf,
}

impl RepositoryManager {
    /// Manager whose hooks point at the running executable
    pub fn new(config: Arc<PcomposeConfig>) -> Result<Self, RepositoryError> {
        let hook_executable = std::env::current_exe().map_err(RepositoryError::Executable)?;
        Ok(Self::with_executable(config, hook_executable))
    }

    /// Manager whose hooks point at an explicit executable
    pub fn with_executable(config: Arc<PcomposeConfig>, hook_executable: PathBuf) -> Self {
        Self {
            config,
            hook_executable,
        }
    }

    /// Make sure `repo_dir` is a bare repository with hooks installed
    pub async fn prepare(&self, repo_dir: &Path) -> Result<(), RepositoryError> {
        self.ensure_bare(repo_dir).await?;
        self.install_hooks(repo_dir);
        Ok(())
    }

    /// Create the directory and run `git init --bare` unless it already is one
    pub async fn ensure_bare(&self, repo_dir: &Path) -> Result<(), RepositoryError> {
        tokio::fs::create_dir_all(repo_dir)
            .await
            .map_err(|source| RepositoryError::Io {
                path: repo_dir.to_path_buf(),
                source,
            })?;

        if is_bare_repository(repo_dir) {
            return Ok(());
        }

        tracing::info!("Initializing bare repository at {}", repo_dir.display());
        Git::new(&self.config.tools)
            .init_bare(repo_dir)
            .run_checked()
            .await
            .map_err(|e| RepositoryError::GitInit(repo_dir.to_path_buf(), e))
    }

    /// Link every hook and the hooks config into `<repo>/hooks`
    ///
    /// Individual link failures are logged and skipped so a partially
    /// writable repository still accepts pushes.
    pub fn install_hooks(&self, repo_dir: &Path) {
        let hooks_dir = repo_dir.join(HOOKS_DIR_NAME);
        if let Err(e) = std::fs::create_dir_all(&hooks_dir) {
            tracing::warn!("Failed to create {}: {}", hooks_dir.display(), e);
            return;
        }

        for hook in HOOK_NAMES {
            let link = hooks_dir.join(hook);
            if let Err(e) = ensure_symlink(&self.hook_executable, &link) {
                tracing::warn!("Failed to install hook {}: {}", link.display(), e);
            }
        }

        let config_link = hooks_config_path(repo_dir);
        if let Err(e) = ensure_symlink(&self.config.hooks_config_file(), &config_link) {
            tracing::warn!(
                "Failed to link hooks config {}: {}",
                config_link.display(),
                e
            );
        }
    }
}

/// `git init --bare` leaves `HEAD` and `objects/` behind
fn is_bare_repository(dir: &Path) -> bool {
    dir.join("HEAD").is_file() && dir.join("objects").is_dir()
}

/// Point `link` at `target`, replacing whatever was there unless it already matches
fn ensure_symlink(target: &Path, link: &Path) -> io::Result<()> {
    match std::fs::read_link(link) {
        Ok(existing) if existing == target => return Ok(()),
        Ok(_) => std::fs::remove_file(link)?,
        Err(_) if link.exists() => std::fs::remove_file(link)?,
        Err(_) => {}
    }
    symlink(target, link)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinked hooks require a unix host",
    ))
}
