//! Request rewriting for the reverse-proxy path.

use std::str::FromStr;

use axum::body::Body;
use axum::http::uri::{PathAndQuery, Scheme};
use axum::http::{header, HeaderValue, Request, Uri};

use crate::http::request_host;

/// Capability interface for rewriting a request before it is forwarded.
pub trait RequestRewriter: Send + Sync {
    fn rewrite(&self, request: &mut Request<Body>);
}

/// The standard upstream director.
///
/// Points the request at the backend over plain HTTP using the original
/// host (port stripped), and supplies an empty `User-Agent` when the client
/// sent none so the backend never sees a library default.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpstreamDirector;

impl RequestRewriter for UpstreamDirector {
    fn rewrite(&self, request: &mut Request<Body>) {
        let Some(host) = request_host(request) else {
            return;
        };

        let mut parts = request.uri().clone().into_parts();
        parts.scheme = Some(Scheme::HTTP);
        match axum::http::uri::Authority::from_str(&host) {
            Ok(authority) => parts.authority = Some(authority),
            Err(_) => return,
        }
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        if let Ok(uri) = Uri::from_parts(parts) {
            *request.uri_mut() = uri;
        }

        if let Ok(value) = HeaderValue::from_str(&host) {
            request.headers_mut().insert(header::HOST, value);
        }
        if !request.headers().contains_key(header::USER_AGENT) {
            request
                .headers_mut()
                .insert(header::USER_AGENT, HeaderValue::from_static(""));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(host: &str, path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header(header::HOST, host)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn rewrites_scheme_host_and_strips_port() {
        let mut req = request("example.test:443", "/some/path?q=1");
        UpstreamDirector.rewrite(&mut req);

        assert_eq!(req.uri().scheme_str(), Some("http"));
        assert_eq!(req.uri().host(), Some("example.test"));
        assert_eq!(req.uri().path_and_query().unwrap().as_str(), "/some/path?q=1");
        assert_eq!(req.headers()[header::HOST], "example.test");
    }

    #[test]
    fn missing_user_agent_becomes_empty() {
        let mut req = request("example.test", "/");
        UpstreamDirector.rewrite(&mut req);
        assert_eq!(req.headers()[header::USER_AGENT], "");
    }

    #[test]
    fn existing_user_agent_is_kept() {
        let mut req = request("example.test", "/");
        req.headers_mut()
            .insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));
        UpstreamDirector.rewrite(&mut req);
        assert_eq!(req.headers()[header::USER_AGENT], "curl/8.0");
    }
}
