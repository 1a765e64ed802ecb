//! Push-to-deploy pipeline
//!
//! Runs after git accepted a push: syncs the working tree next to the bare
//! repository, then brings the compose project up from it. The pushed refs
//! stay accepted whatever happens here; failures only turn into a non-zero
//! hook exit that git relays to the pusher.

use std::path::{Path, PathBuf};

use pc_core::tools::{default_branch_from_symbolic_ref, Compose, Docker, Git};
use pc_core::types::working_tree_dir;
use pc_core::{PcomposeConfig, ProjectName};

use crate::error::DeployError;

/// Deployment of one bare repository
pub struct DeployPipeline<'a> {
    config: &'a PcomposeConfig,
    repo_dir: PathBuf,
    work_dir: PathBuf,
    project: ProjectName,
}

impl<'a> DeployPipeline<'a> {
    /// Prepare the pipeline for `repo_dir`
    pub fn new(config: &'a PcomposeConfig, repo_dir: &Path) -> Result<Self, DeployError> {
        let data_dir = resolve_data_dir(&config.data_directory)?;
        let project = project_name(&data_dir, repo_dir)?;

        Ok(Self {
            config,
            repo_dir: repo_dir.to_path_buf(),
            work_dir: working_tree_dir(repo_dir),
            project,
        })
    }

    /// Compose project the repository deploys as
    pub fn project(&self) -> &ProjectName {
        &self.project
    }

    /// Working tree the project is deployed from
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Sync the working tree and bring the project up
    pub async fn run(&self) -> Result<(), DeployError> {
        self.sync_working_tree().await?;
        self.connect_network().await;
        self.compose_up().await
    }

    /// Clone on first push, otherwise fetch and hard reset to the default branch
    pub async fn sync_working_tree(&self) -> Result<(), DeployError> {
        let git = Git::new(&self.config.tools);

        if !self.work_dir.exists() {
            tracing::info!("Cloning {} into {}", self.repo_dir.display(), self.work_dir.display());
            return git
                .clone_repo(&self.repo_dir, &self.work_dir)
                .run_checked()
                .await
                .map_err(|e| DeployError::Clone(self.work_dir.clone(), e));
        }

        tracing::info!("Updating {}", self.work_dir.display());
        git.fetch(&self.work_dir)
            .run_checked()
            .await
            .map_err(|e| DeployError::Fetch(self.work_dir.clone(), e))?;

        let head = git
            .origin_head(&self.work_dir)
            .output_checked()
            .await
            .map_err(|_| DeployError::DefaultBranch(self.work_dir.clone()))?;
        let branch = default_branch_from_symbolic_ref(&head)
            .ok_or_else(|| DeployError::DefaultBranch(self.work_dir.clone()))?;
        tracing::debug!("Default branch: {}", branch);

        git.reset_hard(&self.work_dir, branch)
            .run_checked()
            .await
            .map_err(|source| DeployError::Reset {
                path: self.work_dir.clone(),
                branch: branch.to_string(),
                source,
            })
    }

    /// Create the project network and attach the frontend; failures are ignored
    pub async fn connect_network(&self) {
        let docker = Docker::new(&self.config.tools);
        let network = self.project.network_name();

        for action in [
            docker.network_create(&network),
            docker.network_connect(&network, &self.config.frontend_container_name),
        ] {
            let action = action.cwd(&self.work_dir);
            match action.run_quiet().await {
                Ok(status) if status.success() => {}
                Ok(status) => tracing::debug!("{:?} exited with {}", action.argv(), status),
                Err(e) => tracing::debug!("{:?} failed: {:?}", action.argv(), e),
            }
        }
    }

    /// `up -d --build` with output going to the pusher
    pub async fn compose_up(&self) -> Result<(), DeployError> {
        let command = Compose::new(&self.config.tools)
            .up_detached_build(&self.project)
            .cwd(&self.work_dir);
        tracing::info!("Deploying project {}", self.project);

        let status = command
            .run_inherited()
            .await
            .and_then(|status| command.check(status));
        status.map_err(|source| DeployError::ComposeUp {
            project: self.project.to_string(),
            source,
        })
    }
}

/// Make the data directory absolute and canonical
///
/// A relative path is taken relative to the directory of the real
/// executable, which is where the server resolved it from.
pub fn resolve_data_dir(data_dir: &Path) -> Result<PathBuf, DeployError> {
    let absolute = if data_dir.is_absolute() {
        data_dir.to_path_buf()
    } else {
        let exe = std::env::current_exe()
            .and_then(|exe| exe.canonicalize())
            .map_err(|source| DeployError::Io {
                path: data_dir.to_path_buf(),
                source,
            })?;
        let base = exe
            .parent()
            .ok_or_else(|| DeployError::Config(format!("{:?} has no parent", exe)))?;
        base.join(data_dir)
    };

    absolute.canonicalize().map_err(|source| DeployError::Io {
        path: absolute,
        source,
    })
}

/// Project name from the repository path below the data directory
pub fn project_name(data_dir: &Path, repo_dir: &Path) -> Result<ProjectName, DeployError> {
    let repo = repo_dir
        .canonicalize()
        .unwrap_or_else(|_| repo_dir.to_path_buf());

    let relative = repo.strip_prefix(data_dir).map_err(|_| {
        DeployError::Config(format!(
            "repository {} is outside the data directory {}",
            repo.display(),
            data_dir.display()
        ))
    })?;

    let project = ProjectName::from_relative_path(relative);
    if project.as_str().is_empty() {
        return Err(DeployError::Config(format!(
            "repository {} is the data directory itself",
            repo.display()
        )));
    }
    Ok(project)
}
