//! Per-host authentication cache.
//!
//! # Design
//! Entries are keyed by origin (scheme, host and port) together with the
//! username and a fingerprint of the credentials, so a cached scheme is only
//! ever replayed to the server that asked for it and only with the
//! credentials that satisfied it. The outer map is locked just long enough
//! to find or replace an entry; each entry carries its own lock so the
//! Digest nonce count advances atomically per request.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::digest::DigestSession;
use crate::credentials::Credentials;
use crate::http::HttpMethod;
use crate::uri::Uri;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthKey {
    origin: String,
    username: String,
    fingerprint: String,
}

impl AuthKey {
    pub fn new(uri: &Uri, credentials: &Credentials) -> Self {
        Self {
            origin: uri.origin(),
            username: credentials.username().to_string(),
            fingerprint: credentials.fingerprint(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Digest,
}

/// What a host accepted after a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAuthState {
    Basic { realm: Option<String> },
    Digest(DigestSession),
}

impl HostAuthState {
    pub fn scheme(&self) -> AuthScheme {
        match self {
            HostAuthState::Basic { .. } => AuthScheme::Basic,
            HostAuthState::Digest(_) => AuthScheme::Digest,
        }
    }

    pub fn realm(&self) -> Option<&str> {
        match self {
            HostAuthState::Basic { realm } => realm.as_deref(),
            HostAuthState::Digest(session) => Some(&session.challenge().realm),
        }
    }

    /// Next `Authorization` value for a request under this state.
    pub fn authorization(&mut self, method: HttpMethod, target: &str, credentials: &Credentials, body: &[u8]) -> String {
        match self {
            HostAuthState::Basic { .. } => credentials.basic_authorization(),
            HostAuthState::Digest(session) => session.authorize(method, target, credentials, body),
        }
    }
}

/// Authentication state learned from challenges, shared by every request a
/// client makes. Clone the `Arc` to share it between clients deliberately.
#[derive(Debug, Default)]
pub struct AuthCache {
    entries: Mutex<HashMap<AuthKey, Arc<Mutex<HostAuthState>>>>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Proactive `Authorization` value for a request to `uri`, if a previous
    /// exchange with the same origin and credentials succeeded.
    pub fn authorization_for(
        &self,
        uri: &Uri,
        credentials: &Credentials,
        method: HttpMethod,
        body: &[u8],
    ) -> Option<String> {
        let key = AuthKey::new(uri, credentials);
        let entry = self.entries.lock().get(&key).cloned()?;
        let mut state = entry.lock();
        Some(state.authorization(method, uri.request_target(), credentials, body))
    }

    /// Remember `state` for `uri` and `credentials`, evicting whatever the
    /// same origin had cached under other credentials.
    pub fn record(&self, uri: &Uri, credentials: &Credentials, state: HostAuthState) {
        let key = AuthKey::new(uri, credentials);
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| k.origin != key.origin);
        if entries.len() < before {
            debug!(origin = %key.origin, "replacing cached authentication");
        }
        entries.insert(key, Arc::new(Mutex::new(state)));
    }

    /// Drop the state cached for `uri` and `credentials`.
    pub fn forget(&self, uri: &Uri, credentials: &Credentials) {
        self.entries.lock().remove(&AuthKey::new(uri, credentials));
    }

    pub fn scheme_for(&self, uri: &Uri, credentials: &Credentials) -> Option<AuthScheme> {
        let entry = self.entries.lock().get(&AuthKey::new(uri, credentials)).cloned()?;
        let scheme = entry.lock().scheme();
        Some(scheme)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
