//! Pseudoterminal sessions
//!
//! The process runs on the slave side of a freshly allocated pseudoterminal.
//! The master is parked in the [`ConnectionState`] so `window-change` can
//! resize it, while two blocking loops copy bytes between the master and the
//! channel.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty};
use russh::server::Handle;
use russh::ChannelId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pc_core::CommandDescriptor;

use super::{finish_channel, send_data, FAILURE_EXIT_CODE};
use crate::connection::{pty_size, ConnectionState};

/// How long to wait for pending output after the process exits
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Run `command` on a pseudoterminal wired to `channel` until it exits
///
/// The connection's pseudoterminal slot must already be reserved; it is
/// released before the exit status is sent.
pub async fn run_pty_session(
    handle: Handle,
    channel: ChannelId,
    command: CommandDescriptor,
    connection: Arc<ConnectionState>,
    stdin_rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    let exit_code = match spawn_on_pty(&command, &connection).await {
        Ok(running) => running.proxy(&handle, channel, stdin_rx, cancel).await,
        Err(e) => {
            tracing::error!("Failed to start {:?} on a pseudoterminal: {:#}", command.argv(), e);
            FAILURE_EXIT_CODE
        }
    };

    connection.release_pty().await;
    tracing::debug!(
        "Pseudoterminal session on {:?} finished with {}",
        channel,
        exit_code
    );
    finish_channel(&handle, channel, exit_code).await;
}

/// A process running on a pseudoterminal whose master is attached to the connection
struct RunningPty {
    child: Box<dyn Child + Send + Sync>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
}

async fn spawn_on_pty(
    command: &CommandDescriptor,
    connection: &ConnectionState,
) -> Result<RunningPty> {
    let geometry = connection.geometry().await;
    tracing::info!("Spawning {:?} on a {} pseudoterminal", command.argv(), geometry);

    let pair = native_pty_system()
        .openpty(pty_size(geometry))
        .context("Failed to open pseudoterminal")?;

    let child = pair
        .slave
        .spawn_command(command_builder(command))
        .with_context(|| format!("Failed to spawn {}", command.program))?;
    // The child holds its own copy of the slave
    drop(pair.slave);

    let master: Box<dyn MasterPty + Send> = pair.master;
    let reader = master
        .try_clone_reader()
        .context("Failed to clone pseudoterminal reader")?;
    let writer = master
        .take_writer()
        .context("Failed to take pseudoterminal writer")?;
    let killer = child.clone_killer();

    connection.attach_pty(master).await;

    Ok(RunningPty {
        child,
        killer,
        reader,
        writer,
    })
}

fn command_builder(command: &CommandDescriptor) -> CommandBuilder {
    let mut builder = CommandBuilder::new(&command.program);
    builder.args(&command.args);
    for (key, value) in &command.env {
        builder.env(key, value);
    }
    if let Some(dir) = &command.cwd {
        builder.cwd(dir);
    }
    builder
}

impl RunningPty {
    /// Copy bytes both ways until the process exits or the channel is cancelled
    async fn proxy(
        self,
        handle: &Handle,
        channel: ChannelId,
        stdin_rx: mpsc::Receiver<Vec<u8>>,
        cancel: CancellationToken,
    ) -> u32 {
        let RunningPty {
            mut child,
            mut killer,
            reader,
            writer,
        } = self;

        let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(64);
        let reader_task = spawn_pty_reader(reader, output_tx, cancel.clone());
        let _writer_task = spawn_pty_writer(writer, stdin_rx);

        let output_handle = handle.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(data) = output_rx.recv().await {
                if !send_data(&output_handle, channel, &data).await {
                    break;
                }
            }
        });

        let mut wait = tokio::task::spawn_blocking(move || child.wait());
        let status = tokio::select! {
            status = &mut wait => status,
            _ = cancel.cancelled() => {
                tracing::debug!("Channel {:?} cancelled, killing process", channel);
                if let Err(e) = killer.kill() {
                    tracing::warn!("Failed to kill pseudoterminal process: {}", e);
                }
                wait.await
            }
        };

        let exit_code = match status {
            Ok(Ok(status)) => status.exit_code(),
            Ok(Err(e)) => {
                tracing::warn!("Failed to wait for pseudoterminal process: {}", e);
                FAILURE_EXIT_CODE
            }
            Err(e) => {
                tracing::warn!("Wait task failed: {}", e);
                FAILURE_EXIT_CODE
            }
        };

        // Let buffered output reach the client before the channel closes
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, forwarder).await;
        if !reader_task.is_finished() {
            tracing::debug!("Pseudoterminal reader for {:?} still blocked", channel);
        }

        exit_code
    }
}

/// Blocking loop: pseudoterminal master -> channel
fn spawn_pty_reader(
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match reader.read(&mut buf) {
                // EOF, or EIO once the slave side is gone
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Blocking loop: channel -> pseudoterminal master
fn spawn_pty_writer(
    mut writer: Box<dyn Write + Send>,
    mut rx: mpsc::Receiver<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while let Some(data) = rx.blocking_recv() {
            if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                tracing::debug!("Pseudoterminal write failed: {}", e);
                break;
            }
        }
    })
}
