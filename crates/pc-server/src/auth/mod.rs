//! Authentication for incoming SSH connections
//!
//! With authentication disabled every identity is accepted, which is the
//! usual setup behind a trusted network. Otherwise a password, a listed
//! public key, or both are required.

mod keys;

pub use keys::{AuthorizedKey, AuthorizedKeys};

use pc_core::PcomposeConfig;

/// Decides which credentials are accepted
#[derive(Debug, Default)]
pub struct AuthPolicy {
    /// Whether credentials are checked at all
    enabled: bool,
    /// Accepted password
    password: Option<String>,
    /// Accepted public keys
    keys: AuthorizedKeys,
}

impl AuthPolicy {
    /// Accept everyone
    pub fn open() -> Self {
        Self::default()
    }

    /// Require the given password and/or keys
    pub fn restricted(password: Option<String>, keys: AuthorizedKeys) -> Self {
        Self {
            enabled: true,
            password,
            keys,
        }
    }

    /// Build the policy described by the configuration
    pub fn from_config(config: &PcomposeConfig) -> anyhow::Result<Self> {
        if !config.authentication {
            tracing::info!("Authentication disabled - accepting every connection");
            return Ok(Self::open());
        }

        let keys = AuthorizedKeys::load_from_dir(&config.authentication_keys_directory)?;
        if keys.is_empty() && config.authentication_password.is_none() {
            tracing::warn!("Authentication enabled without password or keys - all connections will be rejected");
        } else {
            tracing::info!("Loaded {} authorized keys", keys.len());
        }

        Ok(Self::restricted(
            config.authentication_password.clone(),
            keys,
        ))
    }

    /// Whether a connection may proceed without credentials
    pub fn allows_anonymous(&self) -> bool {
        !self.enabled
    }

    /// Check a password attempt
    pub fn check_password(&self, password: &str) -> bool {
        if !self.enabled {
            return true;
        }
        self.password.as_deref() == Some(password)
    }

    /// Check a public key by fingerprint
    pub fn check_key(&self, fingerprint: &str) -> bool {
        if !self.enabled {
            return true;
        }
        match self.keys.find(fingerprint) {
            Some(key) => {
                tracing::debug!(
                    "Matched authorized key {}",
                    key.comment.as_deref().unwrap_or(&key.fingerprint)
                );
                true
            }
            None => false,
        }
    }
}
