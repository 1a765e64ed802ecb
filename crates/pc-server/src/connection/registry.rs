//! Registry of live SSH connections

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;

/// Identifier assigned to each accepted connection
pub type ConnectionId = u64;

/// Snapshot of one live connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Remote address
    pub peer_addr: SocketAddr,
    /// Negotiated username, once authenticated
    pub identity: Option<String>,
    /// Open session channels
    pub channels: usize,
    /// Accept time
    pub connected_at: Instant,
}

/// Live connections indexed by id
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionInfo>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record a freshly accepted connection
    pub fn register(&self, peer_addr: SocketAddr) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(
            id,
            ConnectionInfo {
                peer_addr,
                identity: None,
                channels: 0,
                connected_at: Instant::now(),
            },
        );
        id
    }

    /// Forget a connection
    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.remove(&id).map(|(_, info)| info)
    }

    /// Record the authenticated identity
    pub fn set_identity(&self, id: ConnectionId, identity: &str) {
        if let Some(mut info) = self.connections.get_mut(&id) {
            info.identity = Some(identity.to_string());
        }
    }

    /// Count an opened channel
    pub fn channel_opened(&self, id: ConnectionId) {
        if let Some(mut info) = self.connections.get_mut(&id) {
            info.channels += 1;
        }
    }

    /// Count a closed channel
    pub fn channel_closed(&self, id: ConnectionId) {
        if let Some(mut info) = self.connections.get_mut(&id) {
            info.channels = info.channels.saturating_sub(1);
        }
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connection is live
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether one more connection fits under `limit`
    pub fn has_capacity(&self, limit: Option<u32>) -> bool {
        match limit {
            Some(max) => self.len() < max as usize,
            None => true,
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
