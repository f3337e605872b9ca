//! Backend dialing for the reverse-proxy client.
//!
//! The connector ignores the request URI entirely and always dials the
//! target given on the command line, mirroring how the proxy treats the
//! backend as a single opaque endpoint.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

/// Where decrypted traffic is forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendTarget {
    /// TCP endpoint, `host:port`.
    Tcp(String),
    /// Unix domain socket path.
    Unix(PathBuf),
}

/// The given backend string is neither `host:port` nor a socket path.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid backend address {0:?} (expected HOST:PORT or a socket path)")]
pub struct InvalidBackend(pub String);

impl BackendTarget {
    /// Classify a backend argument: anything containing a slash is a unix
    /// socket path, otherwise it must parse as `host:port`.
    pub fn parse(raw: &str) -> Result<Self, InvalidBackend> {
        if raw.contains('/') {
            return Ok(Self::Unix(PathBuf::from(raw)));
        }
        match raw.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Tcp(raw.to_string()))
            }
            _ => Err(InvalidBackend(raw.to_string())),
        }
    }
}

impl std::fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendTarget::Tcp(addr) => write!(f, "tcp:{}", addr),
            BackendTarget::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Established backend connection, TCP or unix.
#[derive(Debug)]
pub enum BackendStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl AsyncRead for BackendStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            BackendStream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BackendStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            BackendStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            BackendStream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            BackendStream::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            BackendStream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl Connection for BackendStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

/// `tower::Service` connector that dials the fixed backend target.
#[derive(Debug, Clone)]
pub struct BackendConnector {
    target: Arc<BackendTarget>,
}

impl BackendConnector {
    pub fn new(target: BackendTarget) -> Self {
        Self {
            target: Arc::new(target),
        }
    }
}

impl tower::Service<Uri> for BackendConnector {
    type Response = TokioIo<BackendStream>;
    type Error = std::io::Error;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _dst: Uri) -> Self::Future {
        let target = Arc::clone(&self.target);
        Box::pin(async move {
            let stream = match target.as_ref() {
                BackendTarget::Tcp(addr) => TcpStream::connect(addr).await.map(BackendStream::Tcp),
                BackendTarget::Unix(path) => {
                    UnixStream::connect(path).await.map(BackendStream::Unix)
                }
            }?;
            Ok(TokioIo::new(stream))
        })
    }
}
