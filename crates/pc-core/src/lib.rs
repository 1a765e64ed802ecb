//! pc-core: Core abstractions and configuration for pcompose
//!
//! This crate provides the configuration, the external tool contracts
//! (docker, docker-compose, git), the command router that maps SSH
//! identities and payloads onto those tools, and the bare repository
//! manager used by git pushes.

pub mod command;
pub mod config;
pub mod error;
pub mod repo;
pub mod route;
pub mod tools;
pub mod types;

pub use command::{CommandDescriptor, StdioMode};
pub use config::PcomposeConfig;
pub use error::{ConfigError, ProcessError, RepositoryError, RouteError};
pub use repo::RepositoryManager;
pub use route::{GitService, NetworkAction, Route, Router};
pub use types::ProjectName;

/// Directory inside a bare repository that holds git hooks
pub const HOOKS_DIR_NAME: &str = "hooks";

/// Configuration file shared between the server and its hooks
pub const HOOKS_CONFIG_FILE: &str = "hooks.toml";

/// Hook types installed into every managed repository
pub const HOOK_NAMES: [&str; 3] = ["pre-receive", "update", "post-receive"];
