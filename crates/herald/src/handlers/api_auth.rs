//! Bearer token authentication for admin routes.
//!
//! - Token configured: requires `Authorization: Bearer <token>` header
//! - Token not configured: only accepts requests from loopback addresses

use std::net::SocketAddr;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use sha2::{Digest, Sha256};

/// Check if a request is authorized against an optional token.
///
/// Tokens are compared as SHA-256 digests so the comparison time does not
/// depend on how much of the token matched.
pub fn is_authorized(token: Option<&str>, addr: &SocketAddr, headers: &HeaderMap) -> bool {
    match token {
        Some(expected) => headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|provided| {
                Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
            }),
        None => addr.ip().is_loopback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn addr(ip: &str) -> SocketAddr {
        format!("{ip}:40000").parse().unwrap()
    }

    #[test]
    fn no_token_allows_only_loopback() {
        let headers = HeaderMap::new();
        assert!(is_authorized(None, &addr("127.0.0.1"), &headers));
        assert!(!is_authorized(None, &addr("10.0.0.5"), &headers));
    }

    #[test]
    fn token_must_match() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(is_authorized(Some("s3cret"), &addr("10.0.0.5"), &headers));
        assert!(!is_authorized(Some("other"), &addr("127.0.0.1"), &headers));
        assert!(!is_authorized(Some("s3cret"), &addr("127.0.0.1"), &HeaderMap::new()));
    }
}
