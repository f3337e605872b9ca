//! Accept loops and per-connection serving.
//!
//! Each bound listener runs one accept loop; each accepted connection runs
//! on its own task, tracked in a `JoinSet` so the loop can drain every
//! in-flight connection before it exits. Connections receive the shutdown
//! signal themselves and ask hyper for a graceful close (finish the current
//! exchange, stop keep-alive), so drain is bounded only by client behavior.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::cert::manager::CertManager;
use crate::lifecycle::Shutdown;
use crate::net::listener::Listener;
use crate::net::tls::sni_handshake;

/// Accept loop for an encrypted listener: SNI handshake through the
/// certificate manager, then HTTP over the TLS stream.
pub async fn serve_encrypted(
    listener: Listener,
    manager: Arc<CertManager>,
    app: Router,
    shutdown: Shutdown,
) {
    let address = listener.local_addr();
    accept_loop(listener, shutdown, move |stream, peer_addr, rx| {
        let manager = Arc::clone(&manager);
        let app = app.clone();
        async move {
            let tls = match sni_handshake(stream, &manager).await {
                Ok(tls) => tls,
                Err(err) => {
                    tracing::debug!(peer_addr = %peer_addr, error = %err, "refused TLS handshake");
                    return;
                }
            };
            if let Err(err) = serve_connection(TokioIo::new(tls), app, rx).await {
                tracing::debug!(peer_addr = %peer_addr, error = %err, "connection error");
            }
        }
    })
    .await;
    tracing::info!(address = %address, "encrypted listener drained");
}

/// Accept loop for a plaintext listener (redirects and ACME challenges).
pub async fn serve_plain(listener: Listener, app: Router, shutdown: Shutdown) {
    let address = listener.local_addr();
    accept_loop(listener, shutdown, move |stream, peer_addr, rx| {
        let app = app.clone();
        async move {
            if let Err(err) = serve_connection(TokioIo::new(stream), app, rx).await {
                tracing::debug!(peer_addr = %peer_addr, error = %err, "connection error");
            }
        }
    })
    .await;
    tracing::info!(address = %address, "plaintext listener drained");
}

/// Generic accept loop: stop accepting on shutdown, then wait for every
/// spawned connection task to finish.
async fn accept_loop<H, Fut>(listener: Listener, shutdown: Shutdown, handler: H)
where
    H: Fn(TcpStream, SocketAddr, broadcast::Receiver<()>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let mut rx = shutdown.subscribe();
    let mut connections: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = rx.recv() => break,

            // Reap finished connection tasks as we go.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}

            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr, permit)) => {
                    let conn_rx = shutdown.subscribe();
                    let fut = handler(stream, peer_addr, conn_rx);
                    connections.spawn(async move {
                        let _permit = permit;
                        fut.await;
                    });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                }
            }
        }
    }

    // Drain: listener stops accepting here; in-flight connections finish.
    drop(listener);
    while connections.join_next().await.is_some() {}
}

/// Serve one connection with hyper, honoring graceful shutdown.
async fn serve_connection<I>(
    io: TokioIo<I>,
    app: Router,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let service = TowerToHyperService::new(app);
    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown_rx.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    }
}
