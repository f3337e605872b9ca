//! HTTP layer subsystem.
//!
//! # Data Flow
//! ```text
//! Decrypted request (encrypted listener)
//!     → proxy.rs (director rewrite → backend client)   [proxy mode]
//!     → proxy.rs direct responder                      [direct mode]
//!
//! Plaintext request (port 80 listener)
//!     → plaintext.rs
//!         ├── /.well-known/acme-challenge/<token> → challenge registry
//!         └── everything else → redirect.rs (301 to https)
//! ```
//!
//! # Design Decisions
//! - The director and redirect responder are capability traits implemented
//!   independently of the listeners that host them
//! - The backend connector ignores the request URI and always dials the
//!   configured target (TCP address or unix socket)

pub mod connector;
pub mod director;
pub mod plaintext;
pub mod proxy;
pub mod redirect;

use axum::http::{header, Request};

pub use connector::{BackendConnector, BackendTarget};
pub use director::{RequestRewriter, UpstreamDirector};
pub use redirect::{HttpsRedirect, RedirectResponder};

/// The request's host with any port suffix removed.
///
/// Prefers the `Host` header (HTTP/1.1) and falls back to the URI authority
/// (HTTP/2 `:authority`).
pub(crate) fn request_host<B>(request: &Request<B>) -> Option<String> {
    let raw = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))?;
    Some(strip_port(&raw).to_string())
}

/// Remove a trailing `:port`, leaving IPv6 brackets intact.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        if let Some(end) = host.find(']') {
            return &host[..=end];
        }
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}
