//! Shared server state

use std::sync::Arc;

use pc_core::{PcomposeConfig, RepositoryManager, Router};

use crate::auth::AuthPolicy;
use crate::connection::ConnectionRegistry;

/// State shared by every connection handler
pub struct ServerState {
    /// Configuration
    pub config: Arc<PcomposeConfig>,
    /// Identity and payload router
    pub router: Router,
    /// Bare repository manager for git services
    pub repositories: RepositoryManager,
    /// Authentication policy
    pub auth: Arc<AuthPolicy>,
    /// Live connections
    pub connections: Arc<ConnectionRegistry>,
}

impl ServerState {
    /// Create server state with hooks pointing at the running executable
    pub fn new(config: Arc<PcomposeConfig>, auth: AuthPolicy) -> anyhow::Result<Self> {
        let repositories = RepositoryManager::new(Arc::clone(&config))?;
        Ok(Self::with_repositories(config, auth, repositories))
    }

    /// Create server state with an explicit repository manager
    pub fn with_repositories(
        config: Arc<PcomposeConfig>,
        auth: AuthPolicy,
        repositories: RepositoryManager,
    ) -> Self {
        Self {
            router: Router::new(Arc::clone(&config)),
            repositories,
            auth: Arc::new(auth),
            connections: Arc::new(ConnectionRegistry::new()),
            config,
        }
    }
}
