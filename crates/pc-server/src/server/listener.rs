//! SSH server listener
//!
//! Accepts incoming connections and spawns a handler for each client.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use russh_keys::key::KeyPair;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::server::handler::{ConnectionHandler, ServerConfig};
use crate::state::ServerState;

/// SSH server that listens for incoming connections
pub struct SshServer {
    /// Server configuration
    config: ServerConfig,
    /// Shared server state
    state: Arc<ServerState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl SshServer {
    /// Create a new SSH server
    pub fn new(host_key: KeyPair, state: Arc<ServerState>, cancel: CancellationToken) -> Self {
        Self {
            config: ServerConfig::new(host_key, &state.config),
            state,
            cancel,
        }
    }

    /// Bind to the configured address and serve until cancelled
    pub async fn run(&self) -> Result<()> {
        let bind_addr = self.state.config.ssh_address.clone();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until cancelled
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("SSH server listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("SSH server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => tracing::error!("Failed to accept connection: {}", e),
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a new incoming connection
    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let registry = Arc::clone(&self.state.connections);
        if !registry.has_capacity(self.state.config.max_connections) {
            tracing::warn!(
                peer = %peer_addr,
                "Refusing connection: {} connections already open",
                registry.len()
            );
            return;
        }

        let connection_id = registry.register(peer_addr);
        tracing::info!(peer = %peer_addr, "New connection #{}", connection_id);

        let config = Arc::clone(&self.config.ssh_config);
        let cancel = self.cancel.child_token();
        let handler = ConnectionHandler::new(
            Arc::clone(&self.state),
            connection_id,
            peer_addr,
            cancel.clone(),
        );

        tokio::spawn(async move {
            let result = match russh::server::run_stream(config, socket, handler).await {
                Ok(session) => {
                    let handle = session.handle();
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::debug!(peer = %peer_addr, "Connection cancelled");
                            let _ = handle
                                .disconnect(
                                    russh::Disconnect::ByApplication,
                                    "server shutting down".to_string(),
                                    "en".to_string(),
                                )
                                .await;
                            Ok(())
                        }
                        result = session => result,
                    }
                }
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                tracing::warn!(peer = %peer_addr, "Connection error: {:#}", e);
            }
            if let Some(info) = registry.remove(connection_id) {
                tracing::info!(
                    peer = %peer_addr,
                    identity = info.identity.as_deref().unwrap_or("-"),
                    "Connection #{} closed after {:?}",
                    connection_id,
                    info.connected_at.elapsed()
                );
            }
        });
    }
}

/// Load the host key, or generate one and persist it
pub async fn load_or_generate_host_key(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        tracing::info!("Loading host key from {:?}", path);
        let key = russh_keys::load_secret_key(path, None)
            .with_context(|| format!("Failed to load host key from {:?}", path))?;
        return Ok(key);
    }

    tracing::info!("Generating new host key at {:?}", path);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let key = KeyPair::generate_ed25519()
        .ok_or_else(|| anyhow::anyhow!("Failed to generate Ed25519 key"))?;

    let mut pem = Vec::new();
    russh_keys::encode_pkcs8_pem(&key, &mut pem).context("Failed to encode host key")?;
    write_private(path, &pem)
        .await
        .with_context(|| format!("Failed to write host key to {:?}", path))?;

    Ok(key)
}

#[cfg(unix)]
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::write(path, contents).await?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, contents).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_key_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/ssh_key");

        let generated = load_or_generate_host_key(&path).await.unwrap();
        assert!(path.exists());

        let loaded = load_or_generate_host_key(&path).await.unwrap();
        assert_eq!(
            generated.clone_public_key().unwrap().fingerprint(),
            loaded.clone_public_key().unwrap().fingerprint()
        );
    }
}
