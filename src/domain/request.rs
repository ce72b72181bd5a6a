//! Requests seen by the interception layer.

use std::fmt;

use axum::http::{HeaderMap, Method, header};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::DomainError;

/// What the client intends to do with the response, from `Sec-Fetch-Dest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Top-level navigation.
    Document,
    /// Any sub-resource load (`style`, `script`, `image`, ...).
    Subresource(String),
    /// No hint was supplied.
    Unknown,
}

impl Destination {
    pub fn from_fetch_dest(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Unknown,
            Some(value) if value.eq_ignore_ascii_case("document") => Self::Document,
            Some(value) => Self::Subresource(value.to_ascii_lowercase()),
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Self::Document)
    }
}

/// A request entering the interception layer.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InterceptedRequest {
    /// Plain GET with no destination hint, as issued for manifest entries.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            destination: Destination::Unknown,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// GET for a top-level navigation.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).with_destination(Destination::Document)
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::from_url(&self.url)
    }

    /// Carries `Authorization` or `Cookie`; the answer may be per-user.
    pub fn carries_credentials(&self) -> bool {
        self.headers.contains_key(header::AUTHORIZATION)
            || self.headers.contains_key(header::COOKIE)
    }
}

/// Identity of a cached entry: the absolute URL without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(url.into())
    }

    /// Resolve a manifest path such as `/css/light.css` against the serving origin.
    pub fn resolve(origin: &Url, path: &str) -> Result<Self, DomainError> {
        origin
            .join(path)
            .map(|url| Self::from_url(&url))
            .map_err(|err| DomainError::validation(format!("invalid path `{path}`: {err}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
