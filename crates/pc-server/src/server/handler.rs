//! SSH connection handler
//!
//! Implements the russh server handler. russh delivers the requests of one
//! connection in order, so `pty-req` is fully applied before a following
//! `shell` reads the geometry. Anything long-running is spawned so later
//! requests such as `window-change` keep flowing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, Pty};
use russh_keys::key::{KeyPair, PublicKey};
use tokio_util::sync::CancellationToken;

use pc_core::{PcomposeConfig, Route};
use pc_protocol::TerminalGeometry;

use crate::connection::{ConnectionId, ConnectionState};
use crate::session::{run_exec_session, run_pty_session, ChannelSlot};
use crate::state::ServerState;

/// Handler for a single SSH client connection
pub struct ConnectionHandler {
    /// Shared server state
    state: Arc<ServerState>,
    /// Registry id of this connection
    connection_id: ConnectionId,
    /// Peer address of the connecting client
    peer_addr: SocketAddr,
    /// Negotiated username (set after auth)
    identity: Option<String>,
    /// Geometry and pseudoterminal shared with running sessions
    connection: Arc<ConnectionState>,
    /// Open session channels
    channels: HashMap<ChannelId, ChannelSlot>,
    /// Cancelled when the connection goes away
    cancel: CancellationToken,
}

impl ConnectionHandler {
    /// Create a handler; `cancel` should be derived from the server token
    pub fn new(
        state: Arc<ServerState>,
        connection_id: ConnectionId,
        peer_addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state,
            connection_id,
            peer_addr,
            identity: None,
            connection: Arc::new(ConnectionState::new()),
            channels: HashMap::new(),
            cancel,
        }
    }

    /// Identity used as routing key
    fn identity(&self) -> &str {
        self.identity.as_deref().unwrap_or_default()
    }

    fn accept(&mut self, user: &str) -> Auth {
        self.identity = Some(user.to_string());
        self.state.connections.set_identity(self.connection_id, user);
        tracing::info!(peer = %self.peer_addr, identity = user, "Authenticated");
        Auth::Accept
    }

    fn reject(&self, user: &str, method: &str) -> Auth {
        tracing::warn!(
            peer = %self.peer_addr,
            identity = user,
            "{} authentication rejected",
            method
        );
        Auth::Reject {
            proceed_with_methods: None,
        }
    }

    /// Log a refused non-session channel
    ///
    /// russh answers a `false` open with "administratively prohibited".
    /// Channel types it cannot parse never reach the handler and get
    /// "unknown channel type" from russh itself.
    fn reject_channel(&self, kind: &str, target: &str) {
        tracing::warn!(
            peer = %self.peer_addr,
            identity = self.identity(),
            "Rejected {} channel to {}: only session channels are served",
            kind,
            target
        );
    }

    /// Claim a channel for a process; fails if unknown or already running
    fn start_channel(
        &mut self,
        channel: ChannelId,
    ) -> Option<(tokio::sync::mpsc::Receiver<Vec<u8>>, CancellationToken)> {
        match self.channels.get_mut(&channel) {
            Some(slot) if !slot.is_started() => Some(slot.start()),
            Some(_) => {
                tracing::warn!("Channel {:?} already runs a process", channel);
                None
            }
            None => {
                tracing::warn!("Request on unknown channel {:?}", channel);
                None
            }
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        // Kills whatever is still running on this connection
        self.cancel.cancel();
    }
}

#[async_trait]
impl Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        if self.state.auth.allows_anonymous() {
            Ok(self.accept(user))
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.state.auth.check_password(password) {
            Ok(self.accept(user))
        } else {
            Ok(self.reject(user, "Password"))
        }
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let fingerprint = public_key.fingerprint();
        tracing::debug!(peer = %self.peer_addr, identity = user, "Key fingerprint: {}", fingerprint);

        if self.state.auth.check_key(&fingerprint) {
            Ok(self.accept(user))
        } else {
            Ok(self.reject(user, "Public key"))
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let channel_id = channel.id();
        tracing::debug!(identity = self.identity(), "Channel opened: {:?}", channel_id);

        self.channels
            .insert(channel_id, ChannelSlot::new(&self.cancel));
        self.state.connections.channel_opened(self.connection_id);
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.reject_channel("direct-tcpip", &format!("{}:{}", host_to_connect, port_to_connect));
        Ok(false)
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.reject_channel(
            "forwarded-tcpip",
            &format!("{}:{}", host_to_connect, port_to_connect),
        );
        Ok(false)
    }

    async fn channel_open_x11(
        &mut self,
        _channel: Channel<Msg>,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.reject_channel("x11", &format!("{}:{}", originator_address, originator_port));
        Ok(false)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let geometry = TerminalGeometry::from((col_width, row_height));
        tracing::debug!("pty-req on {:?}: term={}, size={}", channel, term, geometry);

        session.channel_success(channel);
        self.connection.set_geometry(geometry).await;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let geometry = TerminalGeometry::from((col_width, row_height));
        tracing::trace!("window-change on {:?}: {}", channel, geometry);

        self.connection.set_geometry(geometry).await;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !self.connection.reserve_pty().await {
            tracing::warn!(
                identity = self.identity(),
                "Rejected shell on {:?}: connection already owns a pseudoterminal",
                channel
            );
            session.channel_failure(channel);
            return Ok(());
        }

        let Some((stdin_rx, cancel)) = self.start_channel(channel) else {
            self.connection.release_pty().await;
            session.channel_failure(channel);
            return Ok(());
        };

        let route = self.state.router.classify_shell(self.identity());
        let command = self.state.router.descriptor(&route);
        tracing::info!(identity = self.identity(), "Shell on {:?}: {:?}", channel, route);

        session.channel_success(channel);
        tokio::spawn(run_pty_session(
            session.handle(),
            channel,
            command,
            Arc::clone(&self.connection),
            stdin_rx,
            cancel,
        ));
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(
            identity = self.identity(),
            "Exec on {:?}: {}",
            channel,
            String::from_utf8_lossy(data)
        );

        let route = match self.state.router.classify_exec(self.identity(), data) {
            Ok(route) => route,
            Err(e) => {
                tracing::warn!(identity = self.identity(), "No command for exec: {}", e);
                session.channel_failure(channel);
                return Ok(());
            }
        };

        if let Route::GitService { repo_dir, .. } = &route {
            if let Err(e) = self.state.repositories.prepare(repo_dir).await {
                tracing::error!(
                    repo = %repo_dir.display(),
                    "Failed to prepare repository: {:#}",
                    anyhow::Error::from(e)
                );
                session.channel_failure(channel);
                return Ok(());
            }
        }

        let Some((stdin_rx, cancel)) = self.start_channel(channel) else {
            session.channel_failure(channel);
            return Ok(());
        };

        let command = self.state.router.descriptor(&route);
        tracing::info!(identity = self.identity(), "Exec on {:?}: {:?}", channel, route);

        session.channel_success(channel);
        tokio::spawn(run_exec_session(
            session.handle(),
            channel,
            command,
            stdin_rx,
            cancel,
        ));
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Unsupported env request on {:?}: {}", channel, variable_name);
        session.channel_failure(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Unsupported subsystem request on {:?}: {}", channel, name);
        session.channel_failure(channel);
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(slot) = self.channels.get(&channel) {
            slot.forward_stdin(data).await;
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel EOF: {:?}", channel);
        if let Some(slot) = self.channels.get_mut(&channel) {
            slot.close_stdin();
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel closed: {:?}", channel);
        if let Some(slot) = self.channels.remove(&channel) {
            slot.cancel();
            self.state.connections.channel_closed(self.connection_id);
        }
        Ok(())
    }
}

/// Configuration for the SSH server
#[derive(Clone)]
pub struct ServerConfig {
    /// russh server configuration
    pub ssh_config: Arc<russh::server::Config>,
}

impl ServerConfig {
    /// Create a server configuration with the given host key
    pub fn new(host_key: KeyPair, config: &PcomposeConfig) -> Self {
        let mut ssh_config = russh::server::Config::default();
        ssh_config.keys.push(host_key);
        ssh_config.auth_rejection_time = config.auth_rejection_time;
        ssh_config.auth_rejection_time_initial = Some(std::time::Duration::from_secs(0));
        ssh_config.inactivity_timeout = Some(config.inactivity_timeout);

        Self {
            ssh_config: Arc::new(ssh_config),
        }
    }
}
