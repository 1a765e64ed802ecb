//! Piped process sessions (`exec`)

use std::process::Stdio;

use russh::server::Handle;
use russh::ChannelId;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pc_core::{CommandDescriptor, StdioMode};

use super::{finish_channel, send_data, send_stderr, FAILURE_EXIT_CODE};

/// Which channel stream a pipe feeds
#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Run `command` with stdout/stderr piped to `channel`
///
/// Pre-run actions run first and their failures are ignored. Client input is
/// delivered only when the descriptor asks for stdin.
pub async fn run_exec_session(
    handle: Handle,
    channel: ChannelId,
    command: CommandDescriptor,
    stdin_rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    command.run_pre_actions().await;

    let wants_stdin = matches!(command.stdio, StdioMode::Channel { stdin: true });

    let mut cmd = command.to_command();
    cmd.stdin(if wants_stdin {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    tracing::info!("Running {:?}", command.argv());
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!("Failed to spawn {}: {}", command.program, e);
            let message = format!("pcompose: failed to run {}: {}\r\n", command.program, e);
            send_stderr(&handle, channel, message.as_bytes()).await;
            finish_channel(&handle, channel, FAILURE_EXIT_CODE).await;
            return;
        }
    };

    let mut forwarders = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        forwarders.push(spawn_forwarder(stdout, handle.clone(), channel, Stream::Stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        forwarders.push(spawn_forwarder(stderr, handle.clone(), channel, Stream::Stderr));
    }
    let _stdin_task = child.stdin.take().map(|stdin| spawn_stdin_feeder(stdin, stdin_rx));

    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            tracing::debug!("Channel {:?} cancelled, killing {}", channel, command.program);
            if let Err(e) = child.start_kill() {
                tracing::warn!("Failed to kill {}: {}", command.program, e);
            }
            child.wait().await
        }
    };

    // Output must reach the client before the exit status
    for forwarder in forwarders {
        tokio::select! {
            _ = forwarder => {}
            _ = cancel.cancelled() => break,
        }
    }

    let exit_code = match status {
        Ok(status) => status
            .code()
            .and_then(|code| u32::try_from(code).ok())
            .unwrap_or(FAILURE_EXIT_CODE),
        Err(e) => {
            tracing::warn!("Failed to wait for {}: {}", command.program, e);
            FAILURE_EXIT_CODE
        }
    };

    tracing::debug!("{} on {:?} exited with {}", command.program, channel, exit_code);
    finish_channel(&handle, channel, exit_code).await;
}

/// Copy a process pipe into the channel until EOF
fn spawn_forwarder<R>(
    mut pipe: R,
    handle: Handle,
    channel: ChannelId,
    stream: Stream,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 8192];
        loop {
            let n = match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("Read from {:?} failed: {}", stream, e);
                    break;
                }
            };

            let delivered = match stream {
                Stream::Stdout => send_data(&handle, channel, &buf[..n]).await,
                Stream::Stderr => send_stderr(&handle, channel, &buf[..n]).await,
            };
            if !delivered {
                break;
            }
        }
    })
}

/// Feed client data into the process until the client sends EOF
fn spawn_stdin_feeder(
    mut stdin: ChildStdin,
    mut rx: mpsc::Receiver<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = stdin.write_all(&data).await {
                tracing::debug!("Write to process stdin failed: {}", e);
                break;
            }
        }
        // Dropping stdin closes the pipe
        let _ = stdin.shutdown().await;
    })
}
