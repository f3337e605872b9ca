//! SNI-driven TLS termination.
//!
//! The handshake is started lazily so the ClientHello's server name can
//! select (or trigger issuance of) the certificate before the handshake
//! completes. A refused name simply drops the connection, which the client
//! observes as a TLS handshake failure, never an HTTP error.

use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;

use crate::cert::manager::{CertError, CertManager};
use crate::observability::metrics;

/// Why a TLS handshake did not produce a stream.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake io: {0}")]
    Io(#[from] std::io::Error),
    #[error("client sent no server name")]
    NoServerName,
    #[error(transparent)]
    Refused(#[from] CertError),
}

/// Complete a server-side handshake, resolving the certificate from the
/// manager based on the client's SNI.
pub async fn sni_handshake(
    stream: TcpStream,
    manager: &CertManager,
) -> Result<TlsStream<TcpStream>, HandshakeError> {
    let start = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream).await?;

    let server_name = {
        let hello = start.client_hello();
        match hello.server_name() {
            Some(name) => name.to_string(),
            None => {
                metrics::record_handshake("no_sni");
                return Err(HandshakeError::NoServerName);
            }
        }
    };

    let cached = manager.certificate_for(&server_name).await?;
    let tls = start.into_stream(cached.server_config.clone()).await?;
    metrics::record_handshake("completed");
    Ok(tls)
}
