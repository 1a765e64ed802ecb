//! Core error types for pcompose

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Reasons a request could not be mapped onto a command
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouteError {
    /// Exec request without a command
    #[error("Empty exec payload")]
    EmptyPayload,

    /// Git service invoked without a repository argument
    #[error("Missing repository argument for {0}")]
    MissingRepository(String),

    /// Path escapes the data directory or is empty
    #[error("Invalid repository path: {0}")]
    InvalidRepositoryPath(String),

    /// Orchestration command for a project that was never deployed
    #[error("Working tree not found: {0}")]
    MissingWorkingTree(PathBuf),
}

/// Errors raised while preparing a bare repository
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Filesystem operation failed
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `git init --bare` failed
    #[error("git init failed for {0}")]
    GitInit(PathBuf, #[source] ProcessError),

    /// The hook executable could not be located
    #[error("Unable to locate hook executable")]
    Executable(#[source] std::io::Error),
}

/// Errors from running an external tool
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The process could not be started
    #[error("Failed to spawn {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran but exited unsuccessfully
    #[error("{program} exited with {status}")]
    ExitStatus {
        program: String,
        status: std::process::ExitStatus,
    },
}
