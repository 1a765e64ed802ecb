//! Session channel handling
//!
//! Each accepted `session` channel runs at most one process. The handler
//! keeps a [`ChannelSlot`] per channel; once a `shell` or `exec` request is
//! accepted the process runs in its own task and reports back over the
//! connection [`Handle`].

mod exec;
mod pty;

pub use exec::run_exec_session;
pub use pty::run_pty_session;

use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Buffered client-to-process chunks per channel
const STDIN_BUFFER: usize = 64;

/// Exit code reported when no real status is available
pub const FAILURE_EXIT_CODE: u32 = 1;

/// Per-channel bookkeeping kept by the connection handler
pub struct ChannelSlot {
    /// Input towards the running process, dropped on channel EOF
    stdin_tx: Option<mpsc::Sender<Vec<u8>>>,
    /// Whether a process has been started on this channel
    started: bool,
    /// Cancelled when the channel closes
    cancel: CancellationToken,
}

impl ChannelSlot {
    /// Create a slot whose token is derived from the connection token
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            stdin_tx: None,
            started: false,
            cancel: parent.child_token(),
        }
    }

    /// Whether a process has been started on this channel
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Mark the channel as running and hand out the process side of stdin
    pub fn start(&mut self) -> (mpsc::Receiver<Vec<u8>>, CancellationToken) {
        let (tx, rx) = mpsc::channel(STDIN_BUFFER);
        self.stdin_tx = Some(tx);
        self.started = true;
        (rx, self.cancel.clone())
    }

    /// Forward client data to the process
    pub async fn forward_stdin(&self, data: &[u8]) {
        if let Some(tx) = &self.stdin_tx {
            // The process may have exited already
            let _ = tx.send(data.to_vec()).await;
        }
    }

    /// Client sent EOF: close the process stdin
    pub fn close_stdin(&mut self) {
        self.stdin_tx = None;
    }

    /// Stop the process and its copy loops
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Send stdout data, returning false once the channel is gone
pub(crate) async fn send_data(handle: &Handle, channel: ChannelId, data: &[u8]) -> bool {
    handle
        .data(channel, CryptoVec::from_slice(data))
        .await
        .is_ok()
}

/// Send stderr data, returning false once the channel is gone
pub(crate) async fn send_stderr(handle: &Handle, channel: ChannelId, data: &[u8]) -> bool {
    handle
        .extended_data(channel, 1, CryptoVec::from_slice(data))
        .await
        .is_ok()
}

/// Report the exit status, then EOF and close the channel
pub(crate) async fn finish_channel(handle: &Handle, channel: ChannelId, exit_code: u32) {
    if handle.exit_status_request(channel, exit_code).await.is_err() {
        tracing::debug!("Channel {:?} gone before exit-status", channel);
        return;
    }
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}
