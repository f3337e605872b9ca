//! Decrypted-side request handling.
//!
//! # Responsibilities
//! - Build the Axum router served behind the TLS listeners
//! - Proxy mode: rewrite via the director and forward to the backend
//! - Direct mode: answer with the default responder
//! - Wire up middleware (tracing, request timeout) and request IDs

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::http::connector::{BackendConnector, BackendTarget};
use crate::http::director::RequestRewriter;
use crate::observability::metrics;

/// Application state injected into the proxy handler.
#[derive(Clone)]
pub struct ProxyState {
    pub client: Client<BackendConnector, Body>,
    pub director: Arc<dyn RequestRewriter>,
}

/// Router for proxy mode: every method and path forwards upstream.
pub fn proxy_router(
    backend: BackendTarget,
    director: Arc<dyn RequestRewriter>,
    request_timeout: Duration,
) -> Router {
    let client = Client::builder(TokioExecutor::new()).build(BackendConnector::new(backend));
    let state = ProxyState { client, director };

    Router::new()
        .route("/", any(proxy_handler))
        .route("/{*path}", any(proxy_handler))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Router for direct-serve mode.
///
/// Nothing is registered, so every request gets the not-found responder;
/// the startup sanity check only needs a completed HTTPS exchange.
pub fn direct_router() -> Router {
    Router::new()
        .fallback(direct_handler)
        .layer(TraceLayer::new_for_http())
}

async fn direct_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "404 page not found\n")
}

/// Forward one request to the backend.
async fn proxy_handler(
    State(state): State<ProxyState>,
    mut request: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();

    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert("x-request-id", value);
    }

    state.director.rewrite(&mut request);

    tracing::debug!(
        request_id = %request_id,
        method = %request.method(),
        uri = %request.uri(),
        "forwarding request"
    );

    match state.client.request(request).await {
        Ok(response) => {
            metrics::record_proxy_request(response.status().as_u16(), start);
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(err) => {
            metrics::record_proxy_request(StatusCode::BAD_GATEWAY.as_u16(), start);
            tracing::error!(request_id = %request_id, error = %err, "upstream request failed");
            (StatusCode::BAD_GATEWAY, "upstream request failed").into_response()
        }
    }
}
