//! acmefront: a TLS-terminating front door with automatic certificates.
//!
//! Obtains and renews certificates for a fixed set of hostnames via the
//! ACME protocol (HTTP-01), serves them through SNI-selected TLS handshakes,
//! and either answers requests directly or reverse-proxies the decrypted
//! traffic to a backend over TCP or a unix socket.
//!
//! # Architecture Overview
//!
//! ```text
//!  client ──TLS──▶ net::serve (per-address accept loop)
//!                      │ ClientHello / SNI
//!                      ▼
//!                cert::CertManager ──miss──▶ acme::AcmeClient ──▶ directory
//!                      │    ▲                      │
//!                      │    └── cert::CertStore ◀──┘ (durability commit)
//!                      ▼
//!                handshake completes ──▶ http::proxy / direct handler
//!
//!  client ──HTTP──▶ net::serve ──▶ http::plaintext
//!                                   ├── /.well-known/acme-challenge/<token>
//!                                   └── 301 https://<host><path>
//! ```
//!
//! Shutdown is coordinated through [`lifecycle::Shutdown`]: a termination
//! signal stops every accept loop, drains in-flight connections, and only
//! then lets the process exit.

// Core subsystems
pub mod acme;
pub mod cert;
pub mod config;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use cert::manager::CertManager;
pub use cert::HostSet;
pub use config::FrontConfig;
pub use lifecycle::Shutdown;
pub use net::orchestrator::Orchestrator;
