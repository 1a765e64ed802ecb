//! Hook error types

use std::path::PathBuf;
use thiserror::Error;

use pc_core::ProcessError;

/// Failures of the deploy pipeline
#[derive(Error, Debug)]
pub enum DeployError {
    /// Initial clone of the working tree failed
    #[error("Failed to clone into {0}")]
    Clone(PathBuf, #[source] ProcessError),

    /// Fetching into the working tree failed
    #[error("Failed to fetch in {0}")]
    Fetch(PathBuf, #[source] ProcessError),

    /// The remote default branch could not be determined
    #[error("Unable to determine the default branch in {0}")]
    DefaultBranch(PathBuf),

    /// Hard reset to the default branch failed
    #[error("Failed to reset {path} to origin/{branch}")]
    Reset {
        path: PathBuf,
        branch: String,
        #[source]
        source: ProcessError,
    },

    /// `up -d --build` failed
    #[error("Failed to bring up project {project}")]
    ComposeUp {
        project: String,
        #[source]
        source: ProcessError,
    },

    /// Filesystem inspection failed
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration cannot describe this repository
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Failures of a hook invocation
#[derive(Error, Debug)]
pub enum HookError {
    /// Hook invoked under an unknown name
    #[error("Unknown hook type: {0}")]
    UnknownHook(String),

    /// Ref update missing from arguments or stdin
    #[error("Missing ref update for {0}")]
    MissingRefUpdate(&'static str),

    /// Reading stdin failed
    #[error("Failed to read hook input")]
    Io(#[from] std::io::Error),

    /// Deployment failed
    #[error(transparent)]
    Deploy(#[from] DeployError),
}
