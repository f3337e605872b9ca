//! Listener orchestration across resolved addresses.
//!
//! # Responsibilities
//! - Resolve every configured hostname to its addresses (once, at startup)
//! - Bind one encrypted and one plaintext listener per distinct address
//! - Roll back already-started listeners when any bind fails
//! - Track every accept-loop task for the shutdown drain

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use tokio::task::JoinHandle;

use crate::cert::manager::CertManager;
use crate::cert::HostSet;
use crate::config::ListenerConfig;
use crate::lifecycle::Shutdown;
use crate::net::listener::{Listener, ListenerError};
use crate::net::serve::{serve_encrypted, serve_plain};

/// Fatal startup failure; the process must exit rather than run partially
/// bound.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("failed to resolve hostname {hostname}: {source}")]
    Resolve {
        hostname: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to bind {proto} listener on {addr}: {source}")]
    Bind {
        proto: &'static str,
        addr: SocketAddr,
        #[source]
        source: ListenerError,
    },
}

/// Resolve every hostname and return the deduplicated address set.
///
/// Resolution happens once; operators restart the process to pick up DNS
/// changes.
pub async fn resolve_hosts(hosts: &HostSet) -> Result<Vec<IpAddr>, OrchestratorError> {
    let mut addresses = BTreeSet::new();

    for hostname in hosts.iter() {
        let resolved = tokio::net::lookup_host((hostname, 0u16))
            .await
            .map_err(|source| OrchestratorError::Resolve {
                hostname: hostname.to_string(),
                source,
            })?;

        let mut found = false;
        for addr in resolved {
            addresses.insert(addr.ip());
            found = true;
        }
        if !found {
            return Err(OrchestratorError::Resolve {
                hostname: hostname.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "resolver returned no addresses",
                ),
            });
        }
    }

    tracing::info!(addresses = ?addresses, "hostnames resolved");
    Ok(addresses.into_iter().collect())
}

/// Binds and supervises one accept loop per listener.
pub struct Orchestrator {
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
    https_addrs: Vec<SocketAddr>,
    http_addrs: Vec<SocketAddr>,
}

impl Orchestrator {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            shutdown,
            tasks: Vec::new(),
            https_addrs: Vec::new(),
            http_addrs: Vec::new(),
        }
    }

    /// Bind every listener and start serving.
    ///
    /// Serving on an address begins as soon as its listener is bound. If a
    /// later bind fails, everything already started is shut down and
    /// drained before the error is returned, so no address is left serving.
    pub async fn start(
        &mut self,
        addresses: &[IpAddr],
        config: &ListenerConfig,
        manager: Arc<CertManager>,
        https_app: Router,
        plaintext_app: Option<Router>,
    ) -> Result<(), OrchestratorError> {
        for &ip in addresses {
            let addr = SocketAddr::new(ip, config.https_port);
            let listener = match Listener::bind(addr, config.max_connections).await {
                Ok(listener) => listener,
                Err(source) => {
                    self.rollback("https", addr, &source).await;
                    return Err(OrchestratorError::Bind {
                        proto: "https",
                        addr,
                        source,
                    });
                }
            };
            self.https_addrs.push(listener.local_addr());
            self.tasks.push(tokio::spawn(serve_encrypted(
                listener,
                Arc::clone(&manager),
                https_app.clone(),
                self.shutdown.clone(),
            )));
        }

        if let Some(plaintext_app) = plaintext_app {
            for &ip in addresses {
                let addr = SocketAddr::new(ip, config.http_port);
                let listener = match Listener::bind(addr, config.max_connections).await {
                    Ok(listener) => listener,
                    Err(source) => {
                        self.rollback("http", addr, &source).await;
                        return Err(OrchestratorError::Bind {
                            proto: "http",
                            addr,
                            source,
                        });
                    }
                };
                self.http_addrs.push(listener.local_addr());
                self.tasks.push(tokio::spawn(serve_plain(
                    listener,
                    plaintext_app.clone(),
                    self.shutdown.clone(),
                )));
            }
        }

        Ok(())
    }

    async fn rollback(&mut self, proto: &'static str, addr: SocketAddr, source: &ListenerError) {
        tracing::error!(
            proto,
            address = %addr,
            error = %source,
            "bind failed, shutting down already-started listeners"
        );
        self.https_addrs.clear();
        self.http_addrs.clear();
        self.shutdown_and_drain().await;
    }

    /// Addresses the encrypted listeners are bound to.
    pub fn https_addrs(&self) -> &[SocketAddr] {
        &self.https_addrs
    }

    /// Addresses the plaintext listeners are bound to.
    pub fn http_addrs(&self) -> &[SocketAddr] {
        &self.http_addrs
    }

    /// Stop accepting, drain in-flight connections, and return once every
    /// listener task has exited.
    pub async fn shutdown_and_drain(&mut self) {
        self.shutdown.trigger();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "listener task panicked");
            }
        }
    }
}
