//! pcompose
//!
//! Single binary for both halves of pcompose:
//! - the SSH server that routes sessions onto containers, git and compose
//! - the git hooks, entered when invoked as `hooks/<name>` from a repository

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pc_core::config::{self, PcomposeConfig};
use pc_core::ConfigError;
use pc_hook::HookKind;
use pc_server::auth::AuthPolicy;
use pc_server::{load_or_generate_host_key, ServerState, SshServer};

#[derive(Parser)]
#[command(name = "pcompose")]
#[command(author, version, about = "Push-to-deploy SSH server for docker-compose projects")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "PCOMPOSE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind the SSH server to
    #[arg(long, env = "PCOMPOSE_SSH_ADDRESS")]
    ssh_address: Option<String>,

    /// Host key file (generated if missing)
    #[arg(long)]
    host_key_path: Option<PathBuf>,

    /// Directory holding repositories and deployments
    #[arg(long, env = "PCOMPOSE_DATA_DIRECTORY")]
    data_directory: Option<PathBuf>,

    /// Container routing traffic into project networks
    #[arg(long)]
    frontend_container_name: Option<String>,

    /// Container with the orchestration tooling
    #[arg(long)]
    pcompose_container_name: Option<String>,

    /// Require password or key authentication
    #[arg(long)]
    authentication: bool,

    /// Password accepted when authentication is enabled
    #[arg(long, env = "PCOMPOSE_AUTHENTICATION_PASSWORD", hide_env_values = true)]
    authentication_password: Option<String>,

    /// Directory of accepted public keys
    #[arg(long)]
    authentication_keys_directory: Option<PathBuf>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    max_connections: Option<u32>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Verbose request logging
    #[arg(short, long)]
    debug: bool,
}

/// Where the effective configuration came from
enum ConfigSource {
    File(PathBuf),
    Defaults,
    Fallback(PathBuf, ConfigError),
}

fn main() -> ExitCode {
    let mut argv = std::env::args();
    let argv0 = argv.next().unwrap_or_default();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("pcompose: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(kind) = HookKind::from_argv0(&argv0) {
        let args: Vec<String> = argv.collect();
        return runtime.block_on(hook_main(kind, args));
    }

    let args = Args::parse();
    match runtime.block_on(serve(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging; `RUST_LOG` wins over `level`
fn init_logging(level: &str, to_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    if to_stderr {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(std::io::stderr().is_terminal())
                    .without_time(),
            )
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Hook mode: git runs us with the bare repository as working directory
async fn hook_main(kind: HookKind, args: Vec<String>) -> ExitCode {
    let repo_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("pcompose {}: unable to determine repository: {}", kind, e);
            return ExitCode::FAILURE;
        }
    };

    init_logging("info", true);
    let config = pc_hook::load_hook_config(&repo_dir);

    let stdin = std::io::stdin().lock();
    match pc_hook::run_hook(kind, &repo_dir, &args, stdin, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let e = anyhow::Error::from(e);
            tracing::error!("{} hook failed: {:#}", kind, e);
            ExitCode::FAILURE
        }
    }
}

fn load_configuration(path: Option<&PathBuf>) -> Result<(PcomposeConfig, ConfigSource)> {
    if let Some(path) = path {
        let config = config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?;
        return Ok((config, ConfigSource::File(path.clone())));
    }

    let default_path = config::default_config_path();
    if !default_path.exists() {
        return Ok((PcomposeConfig::default(), ConfigSource::Defaults));
    }

    match config::load_config(&default_path) {
        Ok(config) => Ok((config, ConfigSource::File(default_path))),
        Err(e) => Ok((
            PcomposeConfig::default(),
            ConfigSource::Fallback(default_path, e),
        )),
    }
}

fn apply_overrides(mut config: PcomposeConfig, args: &Args) -> PcomposeConfig {
    if let Some(addr) = &args.ssh_address {
        config.ssh_address = addr.clone();
    }
    if let Some(path) = &args.host_key_path {
        config.host_key_path = path.clone();
    }
    if let Some(dir) = &args.data_directory {
        config.data_directory = dir.clone();
    }
    if let Some(name) = &args.frontend_container_name {
        config.frontend_container_name = name.clone();
    }
    if let Some(name) = &args.pcompose_container_name {
        config.pcompose_container_name = name.clone();
    }
    if args.authentication {
        config.authentication = true;
    }
    if let Some(password) = &args.authentication_password {
        config.authentication_password = Some(password.clone());
    }
    if let Some(dir) = &args.authentication_keys_directory {
        config.authentication_keys_directory = dir.clone();
    }
    if args.max_connections.is_some() {
        config.max_connections = args.max_connections;
    }
    config.debug |= args.debug;
    config
}

/// Server mode
async fn serve(args: Args) -> Result<()> {
    let (config, source) = load_configuration(args.config.as_ref())?;
    let config = apply_overrides(config, &args)
        .resolved()
        .context("Failed to resolve configuration paths")?;

    let log_level = if config.debug { "debug" } else { args.log_level.as_str() };
    init_logging(log_level, false);

    tracing::info!("pcompose starting...");
    match source {
        ConfigSource::File(path) => tracing::info!("Loaded configuration from {:?}", path),
        ConfigSource::Defaults => tracing::info!("Using default configuration"),
        ConfigSource::Fallback(path, e) => {
            tracing::warn!("Failed to load config from {:?}: {}", path, e)
        }
    }

    std::fs::create_dir_all(&config.data_directory)
        .with_context(|| format!("Failed to create data directory {:?}", config.data_directory))?;
    let hooks_config = config.hooks_config_file();
    match config::save_config(&hooks_config, &config.for_hooks()) {
        Ok(()) => tracing::debug!("Wrote hook configuration to {:?}", hooks_config),
        Err(e) => tracing::warn!("Failed to write hook configuration {:?}: {}", hooks_config, e),
    }

    let host_key = load_or_generate_host_key(&config.host_key_path).await?;
    let fingerprint = host_key
        .clone_public_key()
        .context("Failed to derive host public key")?
        .fingerprint();
    tracing::info!("Host key fingerprint: {}", fingerprint);

    let auth = AuthPolicy::from_config(&config)?;
    let config = Arc::new(config);
    let state = Arc::new(ServerState::new(Arc::clone(&config), auth)?);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let server = SshServer::new(host_key, state, cancel);
    server.run().await?;

    tracing::info!("pcompose shutdown complete");
    Ok(())
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
