//! Certificate lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! TLS ClientHello (SNI)
//!     → manager.rs (host policy, cache hot path, pending-issuance dedup)
//!         → store.rs (durable per-hostname cache, restart adoption)
//!         → acme::Issuer (fresh issuance / renewal)
//!     → rustls ServerConfig for the handshake
//!
//! Plaintext /.well-known/acme-challenge/<token>
//!     → challenge.rs (token registry, guard-scoped lifetime)
//! ```
//!
//! # Design Decisions
//! - The store write is the sole durability commit point: an order that
//!   cannot be persisted counts as a failed issuance
//! - Failed issuances are never cached; the next handshake retries
//! - Records are replaced, never mutated in place

pub mod challenge;
pub mod manager;
pub mod store;

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use crate::config::validation::is_valid_dns_name;

/// One hostname's current certificate material and validity window.
///
/// Owned by the store; replaced wholesale on renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub hostname: String,
    /// PEM-encoded chain, leaf first.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.not_after
    }

    /// Whether the remaining validity has dropped below the renewal window.
    pub fn within_renewal_window(&self, now: DateTime<Utc>, renew_before_days: u32) -> bool {
        self.not_after - now < Duration::days(i64::from(renew_before_days))
    }

    /// Serve-as-is check for the handshake hot path.
    pub fn is_usable(&self, now: DateTime<Utc>, renew_before_days: u32) -> bool {
        !self.is_expired(now) && !self.within_renewal_window(now, renew_before_days)
    }
}

/// The immutable set of hostnames this process will answer for.
///
/// Acts as the anti-abuse boundary: a handshake for a name outside the set
/// fails before any ACME traffic happens.
#[derive(Debug, Clone)]
pub struct HostSet {
    names: BTreeSet<String>,
}

impl HostSet {
    /// Build the set from configured names, normalizing to lowercase.
    pub fn new<I, S>(names: I) -> Result<Self, InvalidHostname>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for name in names {
            let name = name.as_ref().trim_end_matches('.').to_ascii_lowercase();
            if !is_valid_dns_name(&name) {
                return Err(InvalidHostname(name));
            }
            set.insert(name);
        }
        if set.is_empty() {
            return Err(InvalidHostname(String::new()));
        }
        Ok(Self { names: set })
    }

    pub fn allows(&self, hostname: &str) -> bool {
        self.names.contains(hostname)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A configured hostname failed the syntactic DNS-name check.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid hostname {0:?}")]
pub struct InvalidHostname(pub String);
