//! Hook invocation contract
//!
//! git calls `update` with `refname oldrev newrev` as arguments, and
//! `pre-receive`/`post-receive` with one `oldrev newrev refname` line per
//! updated ref on stdin. Only the first ref update is used.

use std::fmt;
use std::io::BufRead;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use pc_core::{HOOKS_DIR_NAME, HOOK_NAMES};

use crate::error::HookError;

/// The hook types pcompose installs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    PreReceive,
    Update,
    PostReceive,
}

impl HookKind {
    /// Name of the hook file
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::PreReceive => HOOK_NAMES[0],
            HookKind::Update => HOOK_NAMES[1],
            HookKind::PostReceive => HOOK_NAMES[2],
        }
    }

    /// Detect hook mode from argv[0]
    ///
    /// git invokes hooks as `hooks/<name>` relative to the repository, so
    /// the last component must be a hook name and the one before `hooks`.
    pub fn from_argv0(argv0: &str) -> Option<Self> {
        let mut components = Path::new(argv0).components().rev();
        let name = match components.next()? {
            Component::Normal(name) => name.to_str()?,
            _ => return None,
        };
        match components.next()? {
            Component::Normal(parent) if parent == HOOKS_DIR_NAME => {}
            _ => return None,
        }
        name.parse().ok()
    }
}

impl FromStr for HookKind {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [HookKind::PreReceive, HookKind::Update, HookKind::PostReceive]
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| HookError::UnknownHook(s.to_string()))
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ref update reported by git
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub old_rev: String,
    pub new_rev: String,
    pub ref_name: String,
}

impl RefUpdate {
    /// `refname oldrev newrev`, as passed to `update`
    pub fn from_args(args: &[String]) -> Option<Self> {
        match args {
            [ref_name, old_rev, new_rev, ..] => Some(Self {
                old_rev: old_rev.clone(),
                new_rev: new_rev.clone(),
                ref_name: ref_name.clone(),
            }),
            _ => None,
        }
    }

    /// `oldrev newrev refname`, as written to `pre-receive`/`post-receive` stdin
    pub fn from_line(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let old_rev = fields.next()?.to_string();
        let new_rev = fields.next()?.to_string();
        let ref_name = fields.next()?.to_string();
        Some(Self {
            old_rev,
            new_rev,
            ref_name,
        })
    }
}

/// A parsed hook invocation
#[derive(Debug, Clone)]
pub struct HookInvocation {
    pub kind: HookKind,
    /// Bare repository the hook runs for
    pub repo_dir: PathBuf,
    pub update: RefUpdate,
}

impl HookInvocation {
    /// Parse the ref update from arguments or the first stdin line
    pub fn parse(
        kind: HookKind,
        repo_dir: &Path,
        args: &[String],
        stdin: impl BufRead,
    ) -> Result<Self, HookError> {
        let update = match kind {
            HookKind::Update => RefUpdate::from_args(args),
            HookKind::PreReceive | HookKind::PostReceive => {
                let mut first = None;
                for line in stdin.lines() {
                    let line = line?;
                    if !line.trim().is_empty() {
                        first = Some(line);
                        break;
                    }
                }
                first.as_deref().and_then(RefUpdate::from_line)
            }
        }
        .ok_or(HookError::MissingRefUpdate(kind.as_str()))?;

        Ok(Self {
            kind,
            repo_dir: repo_dir.to_path_buf(),
            update,
        })
    }
}
