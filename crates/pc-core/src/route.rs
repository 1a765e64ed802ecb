//! Command routing
//!
//! Classification turns an SSH identity (the negotiated username) and a
//! `shell` or `exec` request into a [`Route`]; [`Router::descriptor`] then
//! builds the concrete [`CommandDescriptor`] for it. Keeping the two steps
//! apart lets the session layer match on the route (for example to prepare
//! a git repository) before anything runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::command::{CommandDescriptor, StdioMode};
use crate::config::PcomposeConfig;
use crate::error::RouteError;
use crate::tools::{Compose, Docker, CONTAINER_SHELL, ORCHESTRATION_SHELL};
use crate::types::{relative_project_path, working_tree_dir, ProjectName};

/// Git transport services reachable through `exec`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    UploadPack,
    ReceivePack,
}

impl GitService {
    /// Name of the service binary
    pub fn as_str(&self) -> &'static str {
        match self {
            GitService::UploadPack => "git-upload-pack",
            GitService::ReceivePack => "git-receive-pack",
        }
    }

    /// Match the service named at the start of an exec payload
    fn from_payload(payload: &str) -> Option<Self> {
        [GitService::UploadPack, GitService::ReceivePack]
            .into_iter()
            .find(|service| payload.starts_with(service.as_str()))
    }
}

/// What to do with the frontend container around an orchestration command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkAction {
    /// Create the project network and connect the frontend (`up`)
    Connect,
    /// Disconnect the frontend from the project network (`down`)
    Disconnect,
}

/// A classified request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Interactive shell inside a container
    ContainerShell { container: String, shell: String },
    /// Follow the logs of a container
    ContainerLogs { container: String },
    /// Attach to the primary process of a container
    ContainerAttach { container: String },
    /// Shell in the orchestration container, inside a project working tree
    OrchestrationShell {
        project: ProjectName,
        work_dir: PathBuf,
    },
    /// git-upload-pack / git-receive-pack against a managed bare repository
    GitService {
        service: GitService,
        repo_dir: PathBuf,
    },
    /// Literal orchestration command for the identity's project
    OrchestrationCommand {
        project: ProjectName,
        work_dir: PathBuf,
        args: Vec<String>,
        network: Option<NetworkAction>,
    },
}

impl Route {
    /// Whether the route needs a pseudoterminal
    pub fn needs_pty(&self) -> bool {
        matches!(
            self,
            Route::ContainerShell { .. }
                | Route::ContainerLogs { .. }
                | Route::ContainerAttach { .. }
                | Route::OrchestrationShell { .. }
        )
    }
}

/// Maps identities and exec payloads onto external commands
#[derive(Debug, Clone)]
pub struct Router {
    config: Arc<PcomposeConfig>,
}

impl Router {
    /// Create a router over the shared configuration
    pub fn new(config: Arc<PcomposeConfig>) -> Self {
        Self { config }
    }

    /// The configuration this router resolves paths against
    pub fn config(&self) -> &PcomposeConfig {
        &self.config
    }

    /// `<data>/<identity>/<basename(identity)>`, if the identity is a safe path
    fn project_work_dir(&self, identity: &str) -> Option<PathBuf> {
        let relative = relative_project_path(identity)?;
        Some(working_tree_dir(&self.config.data_directory.join(relative)))
    }

    /// Classify a `shell` request by identity prefix
    pub fn classify_shell(&self, identity: &str) -> Route {
        if let Some(container) = identity.strip_prefix("c-") {
            return Route::ContainerShell {
                container: container.to_string(),
                shell: CONTAINER_SHELL.to_string(),
            };
        }
        if let Some(container) = identity.strip_prefix("l-") {
            return Route::ContainerLogs {
                container: container.to_string(),
            };
        }
        if let Some(container) = identity.strip_prefix("a-") {
            return Route::ContainerAttach {
                container: container.to_string(),
            };
        }

        if let Some(work_dir) = self.project_work_dir(identity) {
            if work_dir.exists() {
                return Route::OrchestrationShell {
                    project: ProjectName::from_identity(identity),
                    work_dir,
                };
            }
        }

        let shell = if identity == self.config.pcompose_container_name {
            ORCHESTRATION_SHELL
        } else {
            CONTAINER_SHELL
        };
        Route::ContainerShell {
            container: identity.to_string(),
            shell: shell.to_string(),
        }
    }

    /// Classify an `exec` request by payload
    pub fn classify_exec(&self, identity: &str, payload: &[u8]) -> Result<Route, RouteError> {
        let payload = String::from_utf8_lossy(payload).replace('\'', "");
        let payload = payload.trim();

        if payload.is_empty() {
            return Err(RouteError::EmptyPayload);
        }

        if let Some(service) = GitService::from_payload(payload) {
            return self.classify_git(service, payload);
        }

        let work_dir = self
            .project_work_dir(identity)
            .ok_or_else(|| RouteError::InvalidRepositoryPath(identity.to_string()))?;
        if !work_dir.exists() {
            return Err(RouteError::MissingWorkingTree(work_dir));
        }

        let args: Vec<String> = payload.split_whitespace().map(str::to_string).collect();
        let network = if args.iter().any(|a| a == "up") {
            Some(NetworkAction::Connect)
        } else if args.iter().any(|a| a == "down") {
            Some(NetworkAction::Disconnect)
        } else {
            None
        };

        Ok(Route::OrchestrationCommand {
            project: ProjectName::from_identity(identity),
            work_dir,
            args,
            network,
        })
    }

    fn classify_git(&self, service: GitService, payload: &str) -> Result<Route, RouteError> {
        let repo_arg = payload
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| RouteError::MissingRepository(service.as_str().to_string()))?;

        let trimmed = repo_arg.strip_suffix(".git").unwrap_or(repo_arg);
        let relative = relative_project_path(trimmed)
            .ok_or_else(|| RouteError::InvalidRepositoryPath(repo_arg.to_string()))?;

        Ok(Route::GitService {
            service,
            repo_dir: self.config.data_directory.join(relative),
        })
    }

    /// Build the command for a classified route
    pub fn descriptor(&self, route: &Route) -> CommandDescriptor {
        let docker = Docker::new(&self.config.tools);

        match route {
            Route::ContainerShell { container, shell } => docker.exec_shell(container, shell),
            Route::ContainerLogs { container } => docker.logs_follow(container),
            Route::ContainerAttach { container } => docker.attach(container),
            Route::OrchestrationShell { project, work_dir } => docker.exec_project_shell(
                &self.config.pcompose_container_name,
                work_dir,
                project,
                ORCHESTRATION_SHELL,
            ),
            Route::GitService { service, repo_dir } => git_service(*service, repo_dir),
            Route::OrchestrationCommand {
                project,
                work_dir,
                args,
                network,
            } => {
                let mut command = Compose::new(&self.config.tools)
                    .command(project, args.iter().cloned())
                    .cwd(work_dir);
                let network_name = project.network_name();
                let frontend = &self.config.frontend_container_name;

                match network {
                    Some(NetworkAction::Connect) => {
                        command = command
                            .pre_run(docker.network_create(&network_name).cwd(work_dir))
                            .pre_run(docker.network_connect(&network_name, frontend).cwd(work_dir));
                    }
                    Some(NetworkAction::Disconnect) => {
                        command = command.pre_run(
                            docker
                                .network_disconnect(&network_name, frontend)
                                .cwd(work_dir),
                        );
                    }
                    None => {}
                }
                command
            }
        }
    }
}

/// `<service> <repo>` with the channel wired to stdin
fn git_service(service: GitService, repo_dir: &Path) -> CommandDescriptor {
    CommandDescriptor::new(service.as_str())
        .args([repo_dir.to_string_lossy()])
        .stdio(StdioMode::Channel { stdin: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router_with_data(data: &Path) -> Router {
        let mut config = PcomposeConfig::default();
        config.data_directory = data.to_path_buf();
        Router::new(Arc::new(config))
    }

    #[test]
    fn test_container_prefixes() {
        let router = router_with_data(Path::new("/nonexistent"));

        let route = router.classify_shell("c-web");
        assert_eq!(
            router.descriptor(&route).argv(),
            vec!["docker", "exec", "-it", "web", "/bin/sh"]
        );

        let route = router.classify_shell("l-web");
        assert_eq!(route, Route::ContainerLogs { container: "web".into() });
        assert_eq!(
            router.descriptor(&route).argv(),
            vec!["docker", "logs", "-f", "web"]
        );

        let route = router.classify_shell("a-web");
        assert_eq!(
            router.descriptor(&route).argv(),
            vec!["docker", "attach", "web"]
        );
    }

    #[test]
    fn test_shell_routes_need_pty() {
        let router = router_with_data(Path::new("/nonexistent"));
        for identity in ["c-web", "l-web", "a-web", "unknown"] {
            let route = router.classify_shell(identity);
            assert!(route.needs_pty());
            assert_eq!(router.descriptor(&route).stdio, StdioMode::Pty);
        }
    }

    #[test]
    fn test_unmatched_identity_falls_back_to_container() {
        let router = router_with_data(Path::new("/nonexistent"));

        let route = router.classify_shell("redis");
        assert_eq!(
            router.descriptor(&route).argv(),
            vec!["docker", "exec", "-it", "redis", "/bin/sh"]
        );

        let route = router.classify_shell("pcompose");
        assert_eq!(
            router.descriptor(&route).argv(),
            vec!["docker", "exec", "-it", "pcompose", "/bin/zsh"]
        );
    }

    #[test]
    fn test_project_shell() {
        let data = tempfile::tempdir().unwrap();
        let work_dir = data.path().join("team/app/app");
        std::fs::create_dir_all(&work_dir).unwrap();
        let router = router_with_data(data.path());

        let route = router.classify_shell("team/app");
        assert_eq!(
            route,
            Route::OrchestrationShell {
                project: ProjectName::from_identity("team/app"),
                work_dir: work_dir.clone(),
            }
        );

        let work_dir = work_dir.to_string_lossy().into_owned();
        assert_eq!(
            router.descriptor(&route).argv(),
            vec![
                "docker",
                "exec",
                "-it",
                "-w",
                work_dir.as_str(),
                "-e",
                "COMPOSE_PROJECT_NAME=team_app",
                "pcompose",
                "/bin/zsh",
            ]
        );
    }

    #[test]
    fn test_exec_git_service() {
        let router = router_with_data(Path::new("/data"));

        let route = router
            .classify_exec("anyone", b"git-receive-pack '/demo.git'")
            .unwrap();
        assert_eq!(
            route,
            Route::GitService {
                service: GitService::ReceivePack,
                repo_dir: PathBuf::from("/data/demo"),
            }
        );

        let command = router.descriptor(&route);
        assert_eq!(command.argv(), vec!["git-receive-pack", "/data/demo"]);
        assert_eq!(command.stdio, StdioMode::Channel { stdin: true });
        assert!(!route.needs_pty());

        let route = router
            .classify_exec("anyone", b"git-upload-pack 'team/app.git'")
            .unwrap();
        assert_eq!(
            router.descriptor(&route).argv(),
            vec!["git-upload-pack", "/data/team/app"]
        );
    }

    #[test]
    fn test_exec_git_service_rejects_bad_paths() {
        let router = router_with_data(Path::new("/data"));

        assert_eq!(
            router.classify_exec("anyone", b"git-upload-pack"),
            Err(RouteError::MissingRepository("git-upload-pack".into()))
        );
        assert!(matches!(
            router.classify_exec("anyone", b"git-receive-pack '../etc.git'"),
            Err(RouteError::InvalidRepositoryPath(_))
        ));
    }

    #[test]
    fn test_exec_empty_payload() {
        let router = router_with_data(Path::new("/data"));
        assert_eq!(router.classify_exec("demo", b"  "), Err(RouteError::EmptyPayload));
    }

    #[test]
    fn test_exec_up_creates_and_connects_network_first() {
        let data = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(data.path().join("demo/demo")).unwrap();
        let router = router_with_data(data.path());

        let route = router.classify_exec("demo", b"up -d").unwrap();
        let command = router.descriptor(&route);

        assert_eq!(command.argv(), vec!["docker-compose", "up", "-d"]);
        assert!(command
            .env
            .contains(&("COMPOSE_PROJECT_NAME".to_string(), "demo".to_string())));
        assert_eq!(command.cwd, Some(data.path().join("demo/demo")));

        let pre: Vec<Vec<&str>> = command.pre_run.iter().map(|c| c.argv()).collect();
        assert_eq!(
            pre,
            vec![
                vec!["docker", "network", "create", "demo_default"],
                vec!["docker", "network", "connect", "demo_default", "nginx-proxy"],
            ]
        );
    }

    #[test]
    fn test_exec_down_disconnects_without_create() {
        let data = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(data.path().join("demo/demo")).unwrap();
        let router = router_with_data(data.path());

        let route = router.classify_exec("demo", b"down").unwrap();
        let command = router.descriptor(&route);

        let pre: Vec<Vec<&str>> = command.pre_run.iter().map(|c| c.argv()).collect();
        assert_eq!(
            pre,
            vec![vec!["docker", "network", "disconnect", "demo_default", "nginx-proxy"]]
        );
    }

    #[test]
    fn test_exec_other_commands_have_no_network_action() {
        let data = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(data.path().join("demo/demo")).unwrap();
        let router = router_with_data(data.path());

        let route = router.classify_exec("demo", b"logs --tail 'update'").unwrap();
        let command = router.descriptor(&route);
        assert!(command.pre_run.is_empty());
        assert_eq!(command.argv(), vec!["docker-compose", "logs", "--tail", "update"]);
    }

    #[test]
    fn test_exec_without_working_tree() {
        let data = tempfile::tempdir().unwrap();
        let router = router_with_data(data.path());
        assert!(matches!(
            router.classify_exec("demo", b"ps"),
            Err(RouteError::MissingWorkingTree(_))
        ));
    }
}
