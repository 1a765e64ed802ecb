//! End-to-end SSH session tests
//!
//! A real server is started on a loopback port with fake `docker` and
//! `docker-compose` scripts, and driven with the russh client.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, ChannelOpenFailure};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use pc_core::{PcomposeConfig, RepositoryManager};
use pc_server::auth::AuthPolicy;
use pc_server::{ServerState, SshServer};

struct Client;

#[async_trait]
impl client::Handler for Client {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Everything a channel delivered until it closed
#[derive(Debug, Default)]
struct Transcript {
    replies: Vec<bool>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

impl Transcript {
    fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

async fn collect(channel: &mut russh::Channel<client::Msg>, until_replies: Option<usize>) -> Transcript {
    let mut transcript = Transcript::default();
    let deadline = Duration::from_secs(15);

    loop {
        if let Some(n) = until_replies {
            if transcript.replies.len() >= n && transcript.replies.last() == Some(&false) {
                break;
            }
        }
        let msg = match tokio::time::timeout(deadline, channel.wait()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(_) => panic!("channel timed out: {:?}", transcript),
        };
        match msg {
            ChannelMsg::Success => transcript.replies.push(true),
            ChannelMsg::Failure => transcript.replies.push(false),
            ChannelMsg::Data { data } => transcript.stdout.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, .. } => transcript.stderr.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status } => transcript.exit_status = Some(exit_status),
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    transcript
}

struct Fixture {
    _dir: tempfile::TempDir,
    data: PathBuf,
    addr: std::net::SocketAddr,
    cancel: CancellationToken,
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

const COMPOSE_SCRIPT: &str =
    "echo \"compose $*\"\necho \"project=$COMPOSE_PROJECT_NAME\" >&2\nexit 3";

async fn start_server(docker_body: &str) -> Fixture {
    start_server_with(docker_body, COMPOSE_SCRIPT).await
}

async fn start_server_with(docker_body: &str, compose_body: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    let data = dir.path().join("data");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::create_dir_all(&data).unwrap();

    write_script(&bin.join("docker"), docker_body);
    write_script(&bin.join("docker-compose"), compose_body);

    let mut config = PcomposeConfig::default();
    config.ssh_address = "127.0.0.1:0".to_string();
    config.data_directory = data.clone();
    config.tools.docker = bin.join("docker").to_string_lossy().into_owned();
    config.tools.compose = bin.join("docker-compose").to_string_lossy().into_owned();
    let config = Arc::new(config);

    let repositories =
        RepositoryManager::with_executable(Arc::clone(&config), bin.join("pcompose"));
    let state = Arc::new(ServerState::with_repositories(
        config,
        AuthPolicy::open(),
        repositories,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server = SshServer::new(
        KeyPair::generate_ed25519().unwrap(),
        state,
        cancel.clone(),
    );
    tokio::spawn(async move { server.serve(listener).await });

    Fixture {
        _dir: dir,
        data,
        addr,
        cancel,
    }
}

async fn connect(fixture: &Fixture, user: &str) -> Handle<Client> {
    let config = Arc::new(client::Config::default());
    let mut handle = client::connect(config, fixture.addr, Client).await.unwrap();
    assert!(handle.authenticate_none(user).await.unwrap());
    handle
}

/// Script body that records its pid next to itself, then blocks
fn pid_recording_script(name: &str) -> String {
    format!(
        "echo $$ > \"$(dirname \"$0\")/{}.pid\"\nexec sleep 30",
        name
    )
}

async fn wait_for_pid(path: &Path) -> String {
    for _ in 0..150 {
        if let Ok(pid) = std::fs::read_to_string(path) {
            let pid = pid.trim().to_string();
            if !pid.is_empty() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("no pid written to {:?}", path);
}

fn process_alive(pid: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("kill -0 {} 2>/dev/null", pid))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

async fn wait_until_dead(pid: &str) -> bool {
    for _ in 0..50 {
        if !process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn test_exec_runs_compose_with_project_env() {
    let fixture = start_server("echo \"docker $*\" >> \"$(dirname \"$0\")/docker.log\"").await;
    std::fs::create_dir_all(fixture.data.join("demo/demo")).unwrap();

    let handle = connect(&fixture, "demo").await;
    let mut channel = handle.channel_open_session().await.unwrap();
    channel.exec(true, "ps --all").await.unwrap();

    let transcript = collect(&mut channel, None).await;
    assert_eq!(transcript.replies, vec![true]);
    assert_eq!(transcript.stdout(), "compose ps --all\n");
    assert_eq!(transcript.stderr(), "project=demo\n");
    assert_eq!(transcript.exit_status, Some(3));
}

#[tokio::test]
async fn test_exec_up_connects_network_first() {
    let fixture = start_server("echo \"docker $*\" >> \"$(dirname \"$0\")/docker.log\"").await;
    std::fs::create_dir_all(fixture.data.join("demo/demo")).unwrap();

    let handle = connect(&fixture, "demo").await;
    let mut channel = handle.channel_open_session().await.unwrap();
    channel.exec(true, "up -d").await.unwrap();

    let transcript = collect(&mut channel, None).await;
    assert_eq!(transcript.stdout(), "compose up -d\n");

    let log_path = fixture.data.parent().unwrap().join("bin/docker.log");
    let log = std::fs::read_to_string(log_path).unwrap();
    assert_eq!(
        log,
        "docker network create demo_default\ndocker network connect demo_default nginx-proxy\n"
    );
}

#[tokio::test]
async fn test_exec_without_working_tree_fails() {
    let fixture = start_server("exit 0").await;

    let handle = connect(&fixture, "missing").await;
    let mut channel = handle.channel_open_session().await.unwrap();
    channel.exec(true, "ps").await.unwrap();

    let transcript = collect(&mut channel, Some(1)).await;
    assert_eq!(transcript.replies, vec![false]);
    assert_eq!(transcript.exit_status, None);
}

#[tokio::test]
async fn test_shell_reports_exit_status_and_second_shell_is_rejected() {
    // Hosts without a pty device cannot run this
    if portable_pty::native_pty_system()
        .openpty(portable_pty::PtySize::default())
        .is_err()
    {
        return;
    }

    let fixture = start_server("echo \"docker $*\"\nsleep 1\nexit 5").await;
    let handle = connect(&fixture, "c-web").await;

    let mut first = handle.channel_open_session().await.unwrap();
    first
        .request_pty(true, "xterm", 100, 30, 0, 0, &[])
        .await
        .unwrap();
    first.request_shell(true).await.unwrap();

    let mut second = handle.channel_open_session().await.unwrap();
    second.request_shell(true).await.unwrap();
    let rejected = collect(&mut second, Some(1)).await;
    assert_eq!(rejected.replies, vec![false]);

    let transcript = collect(&mut first, None).await;
    assert_eq!(transcript.replies, vec![true, true]);
    assert!(transcript.stdout().contains("docker exec -it web /bin/sh"));
    assert_eq!(transcript.exit_status, Some(5));
}

#[tokio::test]
async fn test_git_service_prepares_repository() {
    let git_available = tokio::process::Command::new("git")
        .arg("--version")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !git_available {
        return;
    }

    let fixture = start_server("exit 0").await;
    let handle = connect(&fixture, "anyone").await;
    let mut channel = handle.channel_open_session().await.unwrap();
    channel
        .exec(true, "git-upload-pack '/demo.git'")
        .await
        .unwrap();
    channel.eof().await.unwrap();

    let transcript = collect(&mut channel, None).await;
    assert_eq!(transcript.replies, vec![true]);
    assert!(transcript.exit_status.is_some());

    let repo = fixture.data.join("demo");
    assert!(repo.join("HEAD").is_file());
    for hook in ["pre-receive", "update", "post-receive"] {
        assert!(std::fs::symlink_metadata(repo.join("hooks").join(hook))
            .unwrap()
            .file_type()
            .is_symlink());
    }
    assert_eq!(
        std::fs::read_link(repo.join("hooks/hooks.toml")).unwrap(),
        fixture.data.join("hooks.toml")
    );
}

#[tokio::test]
async fn test_non_session_channels_are_rejected() {
    let fixture = start_server("exit 0").await;
    let handle = connect(&fixture, "demo").await;

    let tcpip = handle
        .channel_open_direct_tcpip("example.com", 80, "127.0.0.1", 40000)
        .await;
    assert!(matches!(
        tcpip,
        Err(russh::Error::ChannelOpenFailure(
            ChannelOpenFailure::AdministrativelyProhibited
        ))
    ));

    let x11 = handle.channel_open_x11("127.0.0.1", 6010).await;
    assert!(matches!(
        x11,
        Err(russh::Error::ChannelOpenFailure(
            ChannelOpenFailure::AdministrativelyProhibited
        ))
    ));

    let streamlocal = handle
        .channel_open_direct_streamlocal("/var/run/docker.sock")
        .await;
    assert!(matches!(
        streamlocal,
        Err(russh::Error::ChannelOpenFailure(
            ChannelOpenFailure::UnknownChannelType
        ))
    ));

    // The connection keeps serving session channels
    assert!(handle.channel_open_session().await.is_ok());
}

#[tokio::test]
async fn test_closing_exec_channel_kills_process() {
    let fixture = start_server_with("exit 0", &pid_recording_script("compose")).await;
    std::fs::create_dir_all(fixture.data.join("demo/demo")).unwrap();
    let pid_file = fixture.data.parent().unwrap().join("bin/compose.pid");

    let handle = connect(&fixture, "demo").await;
    let channel = handle.channel_open_session().await.unwrap();
    channel.exec(true, "logs -f").await.unwrap();

    let pid = wait_for_pid(&pid_file).await;
    assert!(process_alive(&pid));

    channel.close().await.unwrap();
    assert!(wait_until_dead(&pid).await, "process {} survived close", pid);
}

#[tokio::test]
async fn test_closing_shell_channel_kills_process() {
    // Hosts without a pty device cannot run this
    if portable_pty::native_pty_system()
        .openpty(portable_pty::PtySize::default())
        .is_err()
    {
        return;
    }

    let fixture = start_server(&pid_recording_script("docker")).await;
    let pid_file = fixture.data.parent().unwrap().join("bin/docker.pid");

    let handle = connect(&fixture, "c-web").await;
    let channel = handle.channel_open_session().await.unwrap();
    channel
        .request_pty(true, "xterm", 80, 24, 0, 0, &[])
        .await
        .unwrap();
    channel.request_shell(true).await.unwrap();

    let pid = wait_for_pid(&pid_file).await;
    assert!(process_alive(&pid));

    channel.close().await.unwrap();
    assert!(wait_until_dead(&pid).await, "process {} survived close", pid);
}
