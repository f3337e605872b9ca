//! Router for the plaintext (port 80) listeners.
//!
//! Serves pending ACME HTTP-01 challenge responses and redirects everything
//! else to HTTPS.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::cert::manager::CertManager;
use crate::http::redirect::RedirectResponder;

#[derive(Clone)]
struct PlaintextState {
    manager: Arc<CertManager>,
    redirect: Arc<dyn RedirectResponder>,
}

/// Build the plaintext router bound on every resolved address.
pub fn plaintext_router(manager: Arc<CertManager>, redirect: Arc<dyn RedirectResponder>) -> Router {
    Router::new()
        .route(
            "/.well-known/acme-challenge/{token}",
            get(challenge_handler),
        )
        .fallback(redirect_handler)
        .with_state(PlaintextState { manager, redirect })
        .layer(TraceLayer::new_for_http())
}

/// Serve a pending domain-validation response, 404 otherwise.
async fn challenge_handler(
    State(state): State<PlaintextState>,
    Path(token): Path<String>,
) -> Response<Body> {
    match state.manager.challenge_response(&token) {
        Some(key_authorization) => {
            tracing::debug!(token = %token, "served http-01 challenge response");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain")],
                key_authorization,
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn redirect_handler(
    State(state): State<PlaintextState>,
    request: Request<Body>,
) -> Response<Body> {
    state.redirect.respond(&request)
}
