//! Credentials and the per-host credential store.

use std::collections::HashMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// Username and password for one server. Never persisted by this crate.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Stable identifier for this username/password pair that does not reveal
    /// the password. Used to key cached authentication state.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.username.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.password.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// `Authorization` value for the Basic scheme.
    pub fn basic_authorization(&self) -> String {
        let token = BASE64.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Source of credentials for a host.
pub trait CredentialStore: Send + Sync {
    fn credentials_for(&self, host: &str) -> Option<Credentials>;
}

/// In-memory credential store keyed by lowercased host.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    by_host: RwLock<HashMap<String, Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, host: &str, credentials: Credentials) {
        self.by_host.write().insert(host.to_ascii_lowercase(), credentials);
    }

    pub fn clear(&self, host: &str) {
        self.by_host.write().remove(&host.to_ascii_lowercase());
    }

    pub fn clear_all(&self) {
        self.by_host.write().clear();
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn credentials_for(&self, host: &str) -> Option<Credentials> {
        self.by_host.read().get(&host.to_ascii_lowercase()).cloned()
    }
}

/// A store that never has credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

impl CredentialStore for Anonymous {
    fn credentials_for(&self, _host: &str) -> Option<Credentials> {
        None
    }
}
