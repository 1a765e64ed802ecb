//! pc-hook: git hooks for pcompose
//!
//! Every managed bare repository links its `pre-receive`, `update` and
//! `post-receive` hooks to the pcompose binary. When invoked through one of
//! those links the binary parses the ref update git hands it and, for
//! `post-receive`, runs the [`DeployPipeline`].

pub mod deploy;
pub mod error;
pub mod hook;

pub use deploy::DeployPipeline;
pub use error::{DeployError, HookError};
pub use hook::{HookInvocation, HookKind, RefUpdate};

use std::io::BufRead;
use std::path::Path;

use pc_core::config::{hooks_config_path, load_config};
use pc_core::{ConfigError, PcomposeConfig};

/// Load the configuration linked into `<repo>/hooks`, or defaults
pub fn load_hook_config(repo_dir: &Path) -> PcomposeConfig {
    let path = hooks_config_path(repo_dir);
    match load_config::<PcomposeConfig>(&path) {
        Ok(config) => config,
        Err(ConfigError::NotFound(_)) => {
            tracing::warn!("No hook config at {:?}, using defaults", path);
            PcomposeConfig::default()
        }
        Err(e) => {
            tracing::warn!("Failed to load hook config from {:?}: {}, using defaults", path, e);
            PcomposeConfig::default()
        }
    }
}

/// Run one hook invocation
///
/// `repo_dir` is the bare repository git runs the hook in; `args` are the
/// positional arguments after argv[0].
pub async fn run_hook(
    kind: HookKind,
    repo_dir: &Path,
    args: &[String],
    stdin: impl BufRead,
    config: &PcomposeConfig,
) -> Result<(), HookError> {
    let invocation = HookInvocation::parse(kind, repo_dir, args, stdin)?;
    tracing::info!(
        repo = %repo_dir.display(),
        "{} {} {}..{}",
        kind,
        invocation.update.ref_name,
        invocation.update.old_rev,
        invocation.update.new_rev
    );

    match kind {
        // Accepted without policy for now
        HookKind::PreReceive | HookKind::Update => Ok(()),
        HookKind::PostReceive => {
            // git exports GIT_DIR=. to hooks; a clone must not inherit it
            std::env::remove_var("GIT_DIR");
            DeployPipeline::new(config, &invocation.repo_dir)?
                .run()
                .await?;
            Ok(())
        }
    }
}
