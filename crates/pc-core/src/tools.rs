//! Argument builders for the external tools pcompose drives
//!
//! Each builder only produces a [`CommandDescriptor`]; nothing is executed
//! here. Binary names come from [`ToolsConfig`] so tests can substitute
//! fake executables.

use std::path::Path;

use crate::command::{CommandDescriptor, StdioMode};
use crate::config::ToolsConfig;
use crate::types::ProjectName;

/// Default shell inside ordinary containers
pub const CONTAINER_SHELL: &str = "/bin/sh";

/// Shell inside the orchestration container
pub const ORCHESTRATION_SHELL: &str = "/bin/zsh";

/// `docker` invocations
#[derive(Debug, Clone, Copy)]
pub struct Docker<'a> {
    bin: &'a str,
}

impl<'a> Docker<'a> {
    pub fn new(tools: &'a ToolsConfig) -> Self {
        Self { bin: &tools.docker }
    }

    fn command(&self) -> CommandDescriptor {
        CommandDescriptor::new(self.bin)
    }

    /// `docker exec -it <container> <shell>`
    pub fn exec_shell(&self, container: &str, shell: &str) -> CommandDescriptor {
        self.command()
            .args(["exec", "-it", container, shell])
            .stdio(StdioMode::Pty)
    }

    /// `docker exec -it -w <dir> -e COMPOSE_PROJECT_NAME=<project> <container> <shell>`
    pub fn exec_project_shell(
        &self,
        container: &str,
        work_dir: &Path,
        project: &ProjectName,
        shell: &str,
    ) -> CommandDescriptor {
        self.command()
            .args(["exec", "-it", "-w"])
            .args([work_dir.to_string_lossy().into_owned()])
            .args(["-e".to_string(), project.env_assignment()])
            .args([container, shell])
            .stdio(StdioMode::Pty)
    }

    /// `docker logs -f <container>`
    pub fn logs_follow(&self, container: &str) -> CommandDescriptor {
        self.command()
            .args(["logs", "-f", container])
            .stdio(StdioMode::Pty)
    }

    /// `docker attach <container>`
    pub fn attach(&self, container: &str) -> CommandDescriptor {
        self.command()
            .args(["attach", container])
            .stdio(StdioMode::Pty)
    }

    /// `docker network create <network>`
    pub fn network_create(&self, network: &str) -> CommandDescriptor {
        self.command().args(["network", "create", network])
    }

    /// `docker network connect <network> <container>`
    pub fn network_connect(&self, network: &str, container: &str) -> CommandDescriptor {
        self.command().args(["network", "connect", network, container])
    }

    /// `docker network disconnect <network> <container>`
    pub fn network_disconnect(&self, network: &str, container: &str) -> CommandDescriptor {
        self.command()
            .args(["network", "disconnect", network, container])
    }
}

/// `docker-compose` invocations
#[derive(Debug, Clone, Copy)]
pub struct Compose<'a> {
    bin: &'a str,
}

impl<'a> Compose<'a> {
    pub fn new(tools: &'a ToolsConfig) -> Self {
        Self { bin: &tools.compose }
    }

    /// Client supplied arguments, project selected through the environment
    pub fn command<I, S>(&self, project: &ProjectName, args: I) -> CommandDescriptor
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandDescriptor::new(self.bin)
            .args(args)
            .env(crate::types::COMPOSE_PROJECT_ENV, project.as_str())
    }

    /// `docker-compose -p <project> up -d --build`
    pub fn up_detached_build(&self, project: &ProjectName) -> CommandDescriptor {
        CommandDescriptor::new(self.bin).args(["-p", project.as_str(), "up", "-d", "--build"])
    }
}

/// `git` invocations
#[derive(Debug, Clone, Copy)]
pub struct Git<'a> {
    bin: &'a str,
}

/// Ref that tracks the remote default branch in a clone
pub const ORIGIN_HEAD_REF: &str = "refs/remotes/origin/HEAD";

impl<'a> Git<'a> {
    pub fn new(tools: &'a ToolsConfig) -> Self {
        Self { bin: &tools.git }
    }

    fn command(&self) -> CommandDescriptor {
        CommandDescriptor::new(self.bin)
    }

    /// Command run inside a working tree, pinned to its `.git` directory
    fn in_worktree(&self, worktree: &Path) -> CommandDescriptor {
        self.command().cwd(worktree).env("GIT_DIR", ".git")
    }

    /// `GIT_DIR=<repo> git init --bare`
    pub fn init_bare(&self, repo_dir: &Path) -> CommandDescriptor {
        self.command()
            .args(["init", "--bare"])
            .env("GIT_DIR", repo_dir.to_string_lossy())
    }

    /// `git clone <repo> <dest>`
    pub fn clone_repo(&self, repo_dir: &Path, dest: &Path) -> CommandDescriptor {
        self.command()
            .args(["clone".to_string()])
            .args([repo_dir.to_string_lossy(), dest.to_string_lossy()])
    }

    /// `git fetch` inside a working tree
    pub fn fetch(&self, worktree: &Path) -> CommandDescriptor {
        self.in_worktree(worktree).args(["fetch"])
    }

    /// `git symbolic-ref refs/remotes/origin/HEAD` inside a working tree
    pub fn origin_head(&self, worktree: &Path) -> CommandDescriptor {
        self.in_worktree(worktree)
            .args(["symbolic-ref", ORIGIN_HEAD_REF])
    }

    /// `git reset origin/<branch> --hard` inside a working tree
    pub fn reset_hard(&self, worktree: &Path, branch: &str) -> CommandDescriptor {
        self.in_worktree(worktree)
            .args(["reset".to_string(), format!("origin/{}", branch), "--hard".to_string()])
    }
}

/// Branch name from `git symbolic-ref refs/remotes/origin/HEAD` output
pub fn default_branch_from_symbolic_ref(output: &str) -> Option<&str> {
    let branch = output
        .trim()
        .strip_prefix("refs/remotes/origin/")?
        .trim();
    if branch.is_empty() {
        None
    } else {
        Some(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_shells() {
        let tools = ToolsConfig::default();
        let docker = Docker::new(&tools);

        assert_eq!(
            docker.exec_shell("web", CONTAINER_SHELL).argv(),
            vec!["docker", "exec", "-it", "web", "/bin/sh"]
        );
        assert_eq!(docker.logs_follow("web").argv(), vec!["docker", "logs", "-f", "web"]);
        assert_eq!(docker.attach("web").stdio, StdioMode::Pty);
    }

    #[test]
    fn test_compose_up_detached_build() {
        let tools = ToolsConfig::default();
        let project = ProjectName::from_identity("team/app");
        assert_eq!(
            Compose::new(&tools).up_detached_build(&project).argv(),
            vec!["docker-compose", "-p", "team_app", "up", "-d", "--build"]
        );
    }

    #[test]
    fn test_git_worktree_commands_pin_git_dir() {
        let tools = ToolsConfig::default();
        let git = Git::new(&tools);
        let reset = git.reset_hard(Path::new("/data/demo/demo"), "main");

        assert_eq!(reset.argv(), vec!["git", "reset", "origin/main", "--hard"]);
        assert_eq!(reset.cwd.as_deref(), Some(Path::new("/data/demo/demo")));
        assert!(reset.env.contains(&("GIT_DIR".to_string(), ".git".to_string())));
    }

    #[test]
    fn test_default_branch_from_symbolic_ref() {
        assert_eq!(
            default_branch_from_symbolic_ref("refs/remotes/origin/main\n"),
            Some("main")
        );
        assert_eq!(
            default_branch_from_symbolic_ref("refs/remotes/origin/release/v2"),
            Some("release/v2")
        );
        assert_eq!(default_branch_from_symbolic_ref("refs/heads/main"), None);
        assert_eq!(default_branch_from_symbolic_ref("refs/remotes/origin/"), None);
    }
}
