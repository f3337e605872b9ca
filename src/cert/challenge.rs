//! HTTP-01 challenge response registry.
//!
//! The ACME server validates domain control by fetching
//! `/.well-known/acme-challenge/<token>` over plaintext HTTP. Responses are
//! registered here by the issuance path and served by the plaintext router;
//! a registration lives exactly as long as its [`ChallengeGuard`].

use std::sync::Arc;

use dashmap::DashMap;

/// Path prefix the plaintext router matches challenge requests under.
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Concurrent token → key-authorization map shared between the issuance
/// path and every plaintext listener.
#[derive(Debug, Clone, Default)]
pub struct ChallengeRegistry {
    responses: Arc<DashMap<String, String>>,
}

impl ChallengeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending challenge. The returned guard removes the entry
    /// when dropped, so the response is served for exactly the lifetime of
    /// the pending challenge, on success and failure alike.
    #[must_use = "dropping the guard immediately unregisters the challenge"]
    pub fn register(&self, token: &str, key_authorization: &str) -> ChallengeGuard {
        tracing::debug!(token = %token, "registering http-01 challenge response");
        self.responses
            .insert(token.to_string(), key_authorization.to_string());
        ChallengeGuard {
            responses: Arc::clone(&self.responses),
            token: token.to_string(),
        }
    }

    /// Look up the response for a token, if one is pending.
    pub fn response(&self, token: &str) -> Option<String> {
        self.responses.get(token).map(|entry| entry.clone())
    }

    /// Number of currently pending challenges.
    pub fn pending(&self) -> usize {
        self.responses.len()
    }
}

/// Scope handle for one registered challenge response.
#[derive(Debug)]
pub struct ChallengeGuard {
    responses: Arc<DashMap<String, String>>,
    token: String,
}

impl Drop for ChallengeGuard {
    fn drop(&mut self) {
        if self.responses.remove(&self.token).is_some() {
            tracing::debug!(token = %self.token, "unregistered http-01 challenge response");
        }
    }
}
