//! Responses produced by the network, the cache, or a fallback.

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use bytes::Bytes;

/// A fully buffered HTTP response.
///
/// Bodies are `Bytes`, so cloning a response for the cache is cheap.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Response with a body and a content type.
    pub fn with_body(
        status: StatusCode,
        content_type: &'static str,
        body: impl Into<Bytes>,
    ) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self::new(status, headers, body.into())
    }

    /// Empty-body 404 handed to asset loaders when nothing else is available.
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, HeaderMap::new(), Bytes::new())
    }

    /// 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// A 2xx that any client may be served: no `Set-Cookie`, and no
    /// `Cache-Control: private` or `no-store`.
    pub fn is_shareable(&self) -> bool {
        if !self.is_success() || self.headers.contains_key(header::SET_COOKIE) {
            return false;
        }

        !self
            .headers
            .get_all(header::CACHE_CONTROL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|directive| directive.split('=').next().unwrap_or_default().trim())
            .any(|directive| {
                directive.eq_ignore_ascii_case("private")
                    || directive.eq_ignore_ascii_case("no-store")
            })
    }
}
