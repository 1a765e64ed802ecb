//! Authorized public keys

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use russh_keys::key::PublicKey;

/// Public keys accepted for key authentication
#[derive(Debug, Default)]
pub struct AuthorizedKeys {
    /// Accepted keys by fingerprint
    keys: HashMap<String, AuthorizedKey>,
}

/// An accepted public key
#[derive(Debug, Clone)]
pub struct AuthorizedKey {
    /// Key fingerprint
    pub fingerprint: String,
    /// Key comment (if any)
    pub comment: Option<String>,
}

impl AuthorizedKeys {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every key file in a directory
    ///
    /// A missing directory yields an empty store.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut store = Self::new();

        if !dir.is_dir() {
            tracing::warn!("Authorized keys directory not found: {:?}", dir);
            return Ok(store);
        }

        let entries =
            std::fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("Failed to read entry in {:?}", dir))?
                .path();
            if path.is_file() {
                store.load_from_file(&path)?;
            }
        }

        Ok(store)
    }

    /// Load keys from one file in `authorized_keys` format
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let count = self.load_from_str(&content, path);
        tracing::debug!("Loaded {} authorized keys from {:?}", count, path);
        Ok(())
    }

    fn load_from_str(&mut self, content: &str, origin: &Path) -> usize {
        let mut count = 0;

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_openssh_line(line) {
                Some((key, comment)) => {
                    self.add_key(&key, comment);
                    count += 1;
                }
                None => tracing::warn!(
                    "Failed to parse key on line {} of {:?}",
                    line_num + 1,
                    origin
                ),
            }
        }

        count
    }

    /// Look up an authorized key by fingerprint
    pub fn find(&self, fingerprint: &str) -> Option<&AuthorizedKey> {
        self.keys.get(fingerprint)
    }

    /// Check if a key fingerprint is authorized
    pub fn is_authorized(&self, fingerprint: &str) -> bool {
        self.keys.contains_key(fingerprint)
    }

    /// Add a fingerprint to the authorized set
    pub fn add_fingerprint(&mut self, fingerprint: String) {
        self.keys.insert(
            fingerprint.clone(),
            AuthorizedKey {
                fingerprint,
                comment: None,
            },
        );
    }

    /// Add a public key to the authorized set
    pub fn add_key(&mut self, key: &PublicKey, comment: Option<String>) {
        let fingerprint = key.fingerprint();
        self.keys.insert(
            fingerprint.clone(),
            AuthorizedKey {
                fingerprint,
                comment,
            },
        );
    }

    /// Number of authorized keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if there are no authorized keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Parse `[options] type base64 [comment]`, or a bare base64 blob
fn parse_openssh_line(line: &str) -> Option<(PublicKey, Option<String>)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if let [single] = parts.as_slice() {
        return russh_keys::parse_public_key_base64(single)
            .ok()
            .map(|key| (key, None));
    }

    let type_pos = parts
        .iter()
        .position(|p| p.starts_with("ssh-") || p.starts_with("ecdsa-"))?;
    let key = parts
        .get(type_pos + 1)
        .and_then(|blob| russh_keys::parse_public_key_base64(blob).ok())?;

    let comment = parts.get(type_pos + 2..).map(|rest| rest.join(" "));
    Some((key, comment.filter(|c| !c.is_empty())))
}
