//! Certificate manager: the handshake-time certificate source.
//!
//! # Responsibilities
//! - Enforce the host allow-list before any network traffic
//! - Serve cached certificates lock-free on the hot path
//! - Adopt persisted records after a restart
//! - Deduplicate concurrent issuances per hostname (PendingIssuance)
//! - Treat the store write as the sole durability commit point

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use rustls::pki_types::CertificateDer;
use tokio::sync::broadcast;

use crate::acme::{AcmeError, Issuer};
use crate::cert::challenge::ChallengeRegistry;
use crate::cert::store::{CertStore, StoreError};
use crate::cert::{CertificateRecord, HostSet};
use crate::observability::metrics;

/// A record plus the rustls server configuration built from it, shared
/// between every handshake that selects this hostname.
#[derive(Debug)]
pub struct CachedCert {
    pub record: CertificateRecord,
    pub server_config: Arc<rustls::ServerConfig>,
}

impl CachedCert {
    fn build(record: CertificateRecord) -> Result<Self, IssueError> {
        let server_config = build_server_config(&record).map_err(IssueError::Tls)?;
        Ok(Self {
            record,
            server_config,
        })
    }
}

/// Why an issuance attempt produced no usable certificate.
///
/// Cloneable so one outcome can be fanned out to every deduplicated waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IssueError {
    #[error("acme: {0}")]
    Acme(Arc<AcmeError>),
    #[error("persist: {0}")]
    Store(Arc<StoreError>),
    #[error("certificate material rejected: {0}")]
    Tls(String),
    #[error("issuance aborted before completing")]
    Aborted,
}

/// Handshake-time failure for one connection attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CertError {
    /// The requested name is outside the configured host set. Never retried,
    /// never triggers ACME traffic.
    #[error("hostname {0:?} is not in the configured host set")]
    PolicyDenied(String),
    /// Issuance or renewal failed; the next handshake starts a fresh attempt.
    #[error("certificate issuance failed for {hostname}: {source}")]
    IssuanceFailed {
        hostname: String,
        source: IssueError,
    },
}

type IssueOutcome = Result<Arc<CachedCert>, IssueError>;

enum Slot {
    /// This caller starts the issuance.
    Leader,
    /// An issuance is already in flight; wait for its outcome.
    Waiter(broadcast::Receiver<IssueOutcome>),
}

/// Explicit map of in-flight issuances keyed by hostname.
///
/// Insert-if-absent semantics guarantee at most one concurrent ACME order
/// per hostname; every concurrent handshake for that hostname receives the
/// same outcome.
#[derive(Default)]
struct PendingIssuance {
    inner: Mutex<HashMap<String, broadcast::Sender<IssueOutcome>>>,
}

impl PendingIssuance {
    fn join(&self, hostname: &str) -> Slot {
        let mut inner = self.inner.lock().expect("pending issuance lock poisoned");
        match inner.get(hostname) {
            Some(tx) => Slot::Waiter(tx.subscribe()),
            None => {
                let (tx, _) = broadcast::channel(1);
                inner.insert(hostname.to_string(), tx);
                Slot::Leader
            }
        }
    }

    fn finish(&self, hostname: &str) -> Option<broadcast::Sender<IssueOutcome>> {
        self.inner
            .lock()
            .expect("pending issuance lock poisoned")
            .remove(hostname)
    }
}

/// Removes the pending entry if the leader is dropped before completing,
/// so waiters observe an abort instead of hanging forever.
struct LeaderGuard<'a> {
    pending: &'a PendingIssuance,
    hostname: &'a str,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending.finish(self.hostname);
        }
    }
}

/// Orchestrates store, issuer and cache behind a single handshake-path call.
pub struct CertManager {
    hosts: HostSet,
    store: CertStore,
    issuer: Arc<dyn Issuer>,
    challenges: ChallengeRegistry,
    renew_before_days: u32,
    cache: DashMap<String, Arc<CachedCert>>,
    pending: PendingIssuance,
}

impl CertManager {
    pub fn new(
        hosts: HostSet,
        store: CertStore,
        issuer: Arc<dyn Issuer>,
        challenges: ChallengeRegistry,
        renew_before_days: u32,
    ) -> Self {
        Self {
            hosts,
            store,
            issuer,
            challenges,
            renew_before_days,
            cache: DashMap::new(),
            pending: PendingIssuance::default(),
        }
    }

    pub fn hosts(&self) -> &HostSet {
        &self.hosts
    }

    /// Pending HTTP-01 response lookup for the plaintext router.
    pub fn challenge_response(&self, token: &str) -> Option<String> {
        self.challenges.response(token)
    }

    /// Resolve the certificate for an SNI name, issuing or renewing through
    /// ACME when necessary. Called from inside the TLS accept path.
    pub async fn certificate_for(&self, server_name: &str) -> Result<Arc<CachedCert>, CertError> {
        let hostname = server_name.trim_end_matches('.').to_ascii_lowercase();

        if !self.hosts.allows(&hostname) {
            metrics::record_handshake("policy_denied");
            return Err(CertError::PolicyDenied(hostname));
        }

        let now = Utc::now();

        // Hot path: cached and not due for renewal.
        if let Some(cached) = self.cache.get(&hostname) {
            if cached.record.is_usable(now, self.renew_before_days) {
                metrics::record_handshake("cache_hit");
                return Ok(Arc::clone(&*cached));
            }
        } else if let Some(cached) = self.adopt_stored(&hostname) {
            // Restart path: a previously persisted record is still good.
            metrics::record_handshake("store_hit");
            return Ok(cached);
        }

        self.issue_or_wait(&hostname).await
    }

    /// Load a persisted record and cache it if it can still be served.
    fn adopt_stored(&self, hostname: &str) -> Option<Arc<CachedCert>> {
        let record = match self.store.load(hostname) {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(hostname = %hostname, error = %err, "failed to read certificate store");
                return None;
            }
        };

        if !record.is_usable(Utc::now(), self.renew_before_days) {
            return None;
        }

        match CachedCert::build(record) {
            Ok(cached) => {
                let cached = Arc::new(cached);
                self.cache.insert(hostname.to_string(), Arc::clone(&cached));
                tracing::info!(hostname = %hostname, "adopted persisted certificate");
                Some(cached)
            }
            Err(err) => {
                tracing::warn!(hostname = %hostname, error = %err, "persisted certificate unusable, reissuing");
                None
            }
        }
    }

    /// Deduplicated issuance: one leader runs the ACME order, every other
    /// concurrent caller for the same hostname waits for that outcome.
    async fn issue_or_wait(&self, hostname: &str) -> Result<Arc<CachedCert>, CertError> {
        match self.pending.join(hostname) {
            Slot::Waiter(mut rx) => {
                let outcome = match rx.recv().await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(IssueError::Aborted),
                };
                outcome.map_err(|source| CertError::IssuanceFailed {
                    hostname: hostname.to_string(),
                    source,
                })
            }
            Slot::Leader => {
                let mut guard = LeaderGuard {
                    pending: &self.pending,
                    hostname,
                    armed: true,
                };
                let outcome = self.run_issuance(hostname).await;
                if let Some(tx) = self.pending.finish(hostname) {
                    guard.armed = false;
                    let _ = tx.send(outcome.clone());
                }
                drop(guard);
                outcome.map_err(|source| CertError::IssuanceFailed {
                    hostname: hostname.to_string(),
                    source,
                })
            }
        }
    }

    async fn run_issuance(&self, hostname: &str) -> IssueOutcome {
        tracing::info!(hostname = %hostname, "starting certificate issuance");

        let issued = match self.issuer.issue(hostname).await {
            Ok(issued) => issued,
            Err(err) => {
                metrics::record_issuance("failed");
                tracing::warn!(hostname = %hostname, error = %err, "issuance failed");
                return Err(IssueError::Acme(Arc::new(err)));
            }
        };

        let record = CertificateRecord {
            hostname: hostname.to_string(),
            cert_pem: issued.cert_pem,
            key_pem: issued.key_pem,
            not_before: issued.not_before,
            not_after: issued.not_after,
        };

        // Durability commit point: an unsaved certificate would vanish on
        // restart, so a persist failure fails the whole issuance.
        if let Err(err) = self.store.save(&record) {
            metrics::record_issuance("persist_failed");
            tracing::error!(hostname = %hostname, error = %err, "failed to persist certificate");
            return Err(IssueError::Store(Arc::new(err)));
        }

        let cached = Arc::new(CachedCert::build(record)?);
        self.cache.insert(hostname.to_string(), Arc::clone(&cached));
        metrics::record_issuance("issued");
        Ok(cached)
    }
}

/// Build the per-hostname rustls configuration served on handshakes.
fn build_server_config(record: &CertificateRecord) -> Result<Arc<rustls::ServerConfig>, String> {
    let chain: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut record.cert_pem.as_bytes())
            .collect::<Result<_, _>>()
            .map_err(|e| e.to_string())?;
    if chain.is_empty() {
        return Err("chain contains no certificates".to_string());
    }

    let key = rustls_pemfile::private_key(&mut record.key_pem.as_bytes())
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "no private key in record".to_string())?;

    // Explicit provider: other dependencies enable a second rustls backend,
    // which would make the implicit builder ambiguous.
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| e.to_string())?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| e.to_string())?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use chrono::Duration;

    use crate::acme::{AcmeErrorKind, IssuedCert};

    /// Issuer double that counts calls and mints self-signed certificates.
    struct CountingIssuer {
        calls: AtomicUsize,
        delay: StdDuration,
        validity_days: i64,
        fail_first: AtomicUsize,
    }

    impl CountingIssuer {
        fn new(delay: StdDuration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                validity_days: 90,
                fail_first: AtomicUsize::new(0),
            }
        }

        fn failing_once(mut self) -> Self {
            *self.fail_first.get_mut() = 1;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Issuer for CountingIssuer {
        async fn issue(&self, hostname: &str) -> Result<IssuedCert, AcmeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;

            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(AcmeError::new(
                    AcmeErrorKind::Network,
                    "order-create",
                    "synthetic failure",
                ));
            }

            let (cert_pem, key_pem) = test_material(hostname);
            let now = Utc::now();
            Ok(IssuedCert {
                cert_pem,
                key_pem,
                not_before: now - Duration::hours(1),
                not_after: now + Duration::days(self.validity_days),
            })
        }
    }

    fn test_material(hostname: &str) -> (String, String) {
        let certified = rcgen::generate_simple_self_signed(vec![hostname.to_string()]).unwrap();
        (certified.cert.pem(), certified.key_pair.serialize_pem())
    }

    fn manager_with(
        issuer: Arc<CountingIssuer>,
        store: CertStore,
        renew_before_days: u32,
    ) -> CertManager {
        let hosts = HostSet::new(["example.test"]).unwrap();
        CertManager::new(
            hosts,
            store,
            issuer,
            ChallengeRegistry::new(),
            renew_before_days,
        )
    }

    fn temp_store() -> (tempfile::TempDir, CertStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn denied_hostname_never_reaches_the_issuer() {
        let (_dir, store) = temp_store();
        let issuer = Arc::new(CountingIssuer::new(StdDuration::ZERO));
        let manager = manager_with(Arc::clone(&issuer), store, 30);

        match manager.certificate_for("other.test").await {
            Err(CertError::PolicyDenied(name)) => assert_eq!(name, "other.test"),
            other => panic!("expected policy denial, got {:?}", other.map(|_| ())),
        }
        assert_eq!(issuer.calls(), 0);
    }

    #[tokio::test]
    async fn hot_path_makes_no_issuer_calls() {
        let (_dir, store) = temp_store();
        let issuer = Arc::new(CountingIssuer::new(StdDuration::ZERO));
        let manager = manager_with(Arc::clone(&issuer), store, 30);

        let first = manager.certificate_for("example.test").await.unwrap();
        let second = manager.certificate_for("example.test").await.unwrap();

        assert_eq!(issuer.calls(), 1);
        assert_eq!(first.record.cert_pem, second.record.cert_pem);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lookups_place_exactly_one_order() {
        let (_dir, store) = temp_store();
        let issuer = Arc::new(CountingIssuer::new(StdDuration::from_millis(50)));
        let manager = Arc::new(manager_with(Arc::clone(&issuer), store, 30));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager.certificate_for("example.test").await
            }));
        }

        let mut pems = Vec::new();
        for handle in handles {
            let cached = handle.await.unwrap().unwrap();
            pems.push(cached.record.cert_pem.clone());
        }

        assert_eq!(issuer.calls(), 1);
        assert!(pems.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn persisted_record_is_adopted_without_issuing() {
        let (_dir, store) = temp_store();

        let (cert_pem, key_pem) = test_material("example.test");
        let now = Utc::now();
        store
            .save(&CertificateRecord {
                hostname: "example.test".to_string(),
                cert_pem: cert_pem.clone(),
                key_pem,
                not_before: now - Duration::days(1),
                not_after: now + Duration::days(80),
            })
            .unwrap();

        let issuer = Arc::new(CountingIssuer::new(StdDuration::ZERO));
        let manager = manager_with(Arc::clone(&issuer), store, 30);

        let cached = manager.certificate_for("example.test").await.unwrap();
        assert_eq!(cached.record.cert_pem, cert_pem);
        assert_eq!(issuer.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn renewal_window_triggers_exactly_one_renewal() {
        let (_dir, store) = temp_store();

        let (cert_pem, key_pem) = test_material("example.test");
        let now = Utc::now();
        store
            .save(&CertificateRecord {
                hostname: "example.test".to_string(),
                cert_pem,
                key_pem,
                not_before: now - Duration::days(85),
                not_after: now + Duration::days(5),
            })
            .unwrap();

        let issuer = Arc::new(CountingIssuer::new(StdDuration::from_millis(50)));
        let manager = Arc::new(manager_with(Arc::clone(&issuer), store.clone(), 30));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager.certificate_for("example.test").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(issuer.calls(), 1);

        // The renewed record is persisted and served on later lookups.
        let renewed = store.load("example.test").unwrap().unwrap();
        assert!(renewed.not_after > now + Duration::days(30));
        let cached = manager.certificate_for("example.test").await.unwrap();
        assert_eq!(cached.record.not_after, renewed.not_after);
        assert_eq!(issuer.calls(), 1);
    }

    #[tokio::test]
    async fn failed_issuance_is_not_cached() {
        let (_dir, store) = temp_store();
        let issuer = Arc::new(CountingIssuer::new(StdDuration::ZERO).failing_once());
        let manager = manager_with(Arc::clone(&issuer), store, 30);

        match manager.certificate_for("example.test").await {
            Err(CertError::IssuanceFailed { hostname, .. }) => {
                assert_eq!(hostname, "example.test");
            }
            other => panic!("expected issuance failure, got {:?}", other.map(|_| ())),
        }

        // The next handshake starts a fresh attempt and succeeds.
        manager.certificate_for("example.test").await.unwrap();
        assert_eq!(issuer.calls(), 2);
    }

    #[tokio::test]
    async fn sni_names_are_normalized() {
        let (_dir, store) = temp_store();
        let issuer = Arc::new(CountingIssuer::new(StdDuration::ZERO));
        let manager = manager_with(Arc::clone(&issuer), store, 30);

        manager.certificate_for("Example.Test.").await.unwrap();
        manager.certificate_for("example.test").await.unwrap();
        assert_eq!(issuer.calls(), 1);
    }
}
