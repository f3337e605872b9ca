//! Plaintext-to-HTTPS redirection.

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};

use crate::http::request_host;

/// Capability interface for answering a plaintext request with a redirect.
pub trait RedirectResponder: Send + Sync {
    fn respond(&self, request: &Request<Body>) -> Response<Body>;
}

/// Permanent redirect to the same host and path over HTTPS, with any port
/// suffix stripped from the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpsRedirect;

impl RedirectResponder for HttpsRedirect {
    fn respond(&self, request: &Request<Body>) -> Response<Body> {
        let Some(host) = request_host(request) else {
            return plain_response(StatusCode::BAD_REQUEST, "missing host");
        };
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let location = format!("https://{}{}", host, path);

        match Response::builder()
            .status(StatusCode::MOVED_PERMANENTLY)
            .header(header::LOCATION, &location)
            .body(Body::empty())
        {
            Ok(response) => response,
            Err(_) => plain_response(StatusCode::BAD_REQUEST, "unrepresentable redirect target"),
        }
    }
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}
