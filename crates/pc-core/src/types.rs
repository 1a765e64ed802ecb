//! Core domain types

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Environment variable docker-compose reads its project name from
pub const COMPOSE_PROJECT_ENV: &str = "COMPOSE_PROJECT_NAME";

/// Compose project name derived from a repository path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectName(String);

impl ProjectName {
    /// Derive a project name from an SSH identity such as `team/app`
    pub fn from_identity(identity: &str) -> Self {
        Self(identity.replace(std::path::MAIN_SEPARATOR, "_"))
    }

    /// Derive a project name from a path relative to the data directory
    pub fn from_relative_path(path: &Path) -> Self {
        let parts: Vec<_> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect();
        Self(parts.join("_"))
    }

    /// Get the raw name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the default network compose creates for this project
    pub fn network_name(&self) -> String {
        format!("{}_default", self.0)
    }

    /// `COMPOSE_PROJECT_NAME=<name>` assignment
    pub fn env_assignment(&self) -> String {
        format!("{}={}", COMPOSE_PROJECT_ENV, self.0)
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalize a client supplied project path so it stays inside the data directory
///
/// Leading separators are dropped; empty paths and `..` components are refused.
pub fn relative_project_path(raw: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }

    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Deployment working tree of a bare repository: `<repo>/<basename(repo)>`
pub fn working_tree_dir(repo_dir: &Path) -> PathBuf {
    match repo_dir.file_name() {
        Some(name) => repo_dir.join(name),
        None => repo_dir.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_name_from_identity() {
        assert_eq!(ProjectName::from_identity("team/app").as_str(), "team_app");
        assert_eq!(ProjectName::from_identity("demo").as_str(), "demo");
    }

    #[test]
    fn test_project_name_from_relative_path() {
        let name = ProjectName::from_relative_path(Path::new("team/app"));
        assert_eq!(name.as_str(), "team_app");
        assert_eq!(name.network_name(), "team_app_default");
        assert_eq!(name.env_assignment(), "COMPOSE_PROJECT_NAME=team_app");
    }

    #[test]
    fn test_relative_project_path() {
        assert_eq!(relative_project_path("/demo"), Some(PathBuf::from("demo")));
        assert_eq!(
            relative_project_path("team/./app"),
            Some(PathBuf::from("team/app"))
        );
        assert_eq!(relative_project_path("../etc"), None);
        assert_eq!(relative_project_path("team/../../etc"), None);
        assert_eq!(relative_project_path("/"), None);
        assert_eq!(relative_project_path(""), None);
    }

    #[test]
    fn test_working_tree_dir() {
        assert_eq!(
            working_tree_dir(Path::new("/data/team/app")),
            PathBuf::from("/data/team/app/app")
        );
    }
}
