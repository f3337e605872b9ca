//! ACME protocol subsystem.
//!
//! # Data Flow
//! ```text
//! CertManager (cache miss / renewal due)
//!     → client.rs issuance state machine:
//!         AccountEnsure → OrderCreate → ChallengeRespond
//!             → ChallengeWait (poll, backoff.rs)
//!             → FinalizeOrder → CertificateDownload
//!     → IssuedCert handed back for persistence
//! ```
//!
//! # Design Decisions
//! - One issuance at a time per hostname (enforced by the manager)
//! - Account registration happens at most once per process lifetime
//! - Protocol errors carry a retryability kind instead of a deep enum

pub mod backoff;
pub mod client;

use chrono::{DateTime, Utc};

pub use client::AcmeClient;

/// Well-known ACME directory URLs.
pub mod directories {
    /// Let's Encrypt production directory.
    pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
    /// Let's Encrypt staging directory.
    pub const LETS_ENCRYPT_STAGING: &str =
        "https://acme-staging-v02.api.letsencrypt.org/directory";
}

/// The product of a successful issuance, ready for persistence.
#[derive(Debug, Clone)]
pub struct IssuedCert {
    /// PEM-encoded certificate chain, leaf first.
    pub cert_pem: String,
    /// PEM-encoded private key matching the leaf.
    pub key_pem: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Coarse classification of an ACME failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcmeErrorKind {
    /// The server rejected the request (policy, rate limit, invalid order).
    RejectedByServer,
    /// Domain validation did not settle within the bounded wait.
    ChallengeTimeout,
    /// Transport-level failure talking to the directory endpoint.
    Network,
    /// Anything else: malformed responses, local crypto failures.
    Protocol,
}

/// A failed ACME operation, tagged with the state-machine stage it died in.
#[derive(Debug, Clone, thiserror::Error)]
#[error("acme {stage} failed: {detail}")]
pub struct AcmeError {
    pub kind: AcmeErrorKind,
    pub stage: &'static str,
    pub detail: String,
}

impl AcmeError {
    pub fn new(kind: AcmeErrorKind, stage: &'static str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            detail: detail.into(),
        }
    }

    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            AcmeErrorKind::Network | AcmeErrorKind::ChallengeTimeout
        )
    }
}

/// The narrow seam between the certificate manager and the ACME protocol.
///
/// The manager depends on this trait rather than on [`AcmeClient`] directly
/// so its invariants (dedup, policy, hot path) are testable without a
/// directory endpoint.
#[async_trait::async_trait]
pub trait Issuer: Send + Sync {
    /// Obtain a fresh certificate for `hostname`.
    async fn issue(&self, hostname: &str) -> Result<IssuedCert, AcmeError>;
}
