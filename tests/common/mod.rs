//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use acmefront::acme::{AcmeError, AcmeErrorKind, IssuedCert, Issuer};
use acmefront::cert::challenge::ChallengeRegistry;
use acmefront::cert::manager::CertManager;
use acmefront::cert::store::CertStore;
use acmefront::cert::HostSet;
use acmefront::config::ListenerConfig;

/// Issuer double that mints a self-signed certificate per hostname without
/// touching the network.
pub struct StaticIssuer;

#[async_trait::async_trait]
impl Issuer for StaticIssuer {
    async fn issue(&self, hostname: &str) -> Result<IssuedCert, AcmeError> {
        let certified = rcgen::generate_simple_self_signed(vec![hostname.to_string()])
            .map_err(|e| AcmeError::new(AcmeErrorKind::Protocol, "test-issue", e.to_string()))?;
        let now = Utc::now();
        Ok(IssuedCert {
            cert_pem: certified.cert.pem(),
            key_pem: certified.key_pair.serialize_pem(),
            not_before: now - chrono::Duration::hours(1),
            not_after: now + chrono::Duration::days(90),
        })
    }
}

/// Certificate manager wired to the static issuer and a temp store.
pub fn test_manager(hosts: &[&str], store_dir: &Path) -> (Arc<CertManager>, ChallengeRegistry) {
    let store = CertStore::open(store_dir).unwrap();
    let registry = ChallengeRegistry::new();
    let manager = Arc::new(CertManager::new(
        HostSet::new(hosts.iter().copied()).unwrap(),
        store,
        Arc::new(StaticIssuer),
        registry.clone(),
        30,
    ));
    (manager, registry)
}

/// Listener config with ephemeral ports for tests.
pub fn test_listener_config() -> ListenerConfig {
    ListenerConfig {
        https_port: 0,
        http_port: 0,
        max_connections: 64,
    }
}

/// Start a mock backend that answers every connection with a fixed body.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_backend_with_delay(Duration::ZERO, body).await
}

/// Start a mock backend that waits before answering, to keep a transfer
/// in flight during shutdown tests.
pub async fn start_backend_with_delay(delay: Duration, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        // Consume the request head before responding.
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;
                        tokio::time::sleep(delay).await;
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Certificate verifier that accepts anything; the front door serves
/// self-signed test certificates.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn tls_client_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .dangerous()
    .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
    .with_no_client_auth()
}

/// Open a TLS connection with the given SNI, accepting any certificate.
pub async fn tls_connect(
    addr: SocketAddr,
    sni: &str,
) -> std::io::Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_client_config()));
    let tcp = TcpStream::connect(addr).await?;
    let server_name = ServerName::try_from(sni.to_string())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    connector.connect(server_name, tcp).await
}

/// One HTTP/1.1 GET over TLS with the given SNI; returns the raw response.
pub async fn https_get(addr: SocketAddr, sni: &str, path: &str) -> std::io::Result<String> {
    let mut tls = tls_connect(addr, sni).await?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, sni
    );
    tls.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    tls.read_to_string(&mut response).await?;
    Ok(response)
}

/// One plaintext HTTP/1.1 GET; returns the raw response.
pub async fn http_get(addr: SocketAddr, host: &str, path: &str) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}
