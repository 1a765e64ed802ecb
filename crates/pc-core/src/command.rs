//! External process invocation descriptors
//!
//! A [`CommandDescriptor`] is everything needed to start one external tool:
//! argv, environment overrides, working directory, how its stdio is wired to
//! the SSH channel, and the side-effect commands that must run first.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;

use crate::error::ProcessError;

/// How the process stdio is connected to the SSH channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// All three streams go through a pseudoterminal
    Pty,
    /// stdout/stderr are piped to the channel; stdin only when `stdin` is set
    Channel { stdin: bool },
}

/// A fully resolved external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Binary to run
    pub program: String,
    /// Arguments after the binary
    pub args: Vec<String>,
    /// Environment overrides on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Stdio wiring
    pub stdio: StdioMode,
    /// Best-effort side effects run, in order, before the command
    pub pre_run: Vec<CommandDescriptor>,
}

impl CommandDescriptor {
    /// Create a descriptor with piped output and no stdin
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            stdio: StdioMode::Channel { stdin: false },
            pre_run: Vec::new(),
        }
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment override
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set the stdio wiring
    pub fn stdio(mut self, stdio: StdioMode) -> Self {
        self.stdio = stdio;
        self
    }

    /// Add a side-effect command that runs before this one
    pub fn pre_run(mut self, command: CommandDescriptor) -> Self {
        self.pre_run.push(command);
        self
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Build a tokio command with argv, env and cwd applied (stdio untouched)
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Run to completion with all output discarded
    pub async fn run_quiet(&self) -> Result<ExitStatus, ProcessError> {
        let mut cmd = self.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        self.wait_on(cmd).await
    }

    /// Run to completion with stdout/stderr inherited from this process
    pub async fn run_inherited(&self) -> Result<ExitStatus, ProcessError> {
        let mut cmd = self.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        self.wait_on(cmd).await
    }

    /// Run to completion and fail on a non-zero exit status
    pub async fn run_checked(&self) -> Result<(), ProcessError> {
        let status = self.run_quiet().await?;
        self.check(status)
    }

    /// Run to completion and return stdout, failing on a non-zero exit status
    pub async fn output_checked(&self) -> Result<String, ProcessError> {
        let mut cmd = self.to_command();
        cmd.stdin(Stdio::null());
        let output = cmd.output().await.map_err(|source| ProcessError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        self.check(output.status)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run every pre-run command, ignoring failures
    pub async fn run_pre_actions(&self) {
        for action in &self.pre_run {
            match action.run_quiet().await {
                Ok(status) if !status.success() => {
                    tracing::debug!("Pre-run {:?} exited with {}", action.argv(), status);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Pre-run {:?} failed: {:?}", action.argv(), e),
            }
        }
    }

    /// Map a non-zero exit status onto an error
    pub fn check(&self, status: ExitStatus) -> Result<(), ProcessError> {
        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::ExitStatus {
                program: self.program.clone(),
                status,
            })
        }
    }

    async fn wait_on(&self, mut cmd: Command) -> Result<ExitStatus, ProcessError> {
        cmd.status().await.map_err(|source| ProcessError::Spawn {
            program: self.program.clone(),
            source,
        })
    }
}
