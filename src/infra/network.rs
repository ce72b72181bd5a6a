//! Network transport backed by `reqwest`.
//!
//! Requests addressed to the public origin are sent to the upstream origin
//! instead; path and query are kept.

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use reqwest::{Client, redirect};
use tracing::debug;
use url::Url;

use crate::application::transport::{Transport, TransportError};
use crate::config::OriginSettings;
use crate::domain::{CachedResponse, InterceptedRequest};

use super::error::InfraError;

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    public: Url,
    upstream: Url,
}

impl ReqwestTransport {
    pub fn new(origin: &OriginSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(origin.request_timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        Ok(Self {
            client,
            public: origin.public_url.clone(),
            upstream: origin.upstream_url.clone(),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("riparo/", env!("CARGO_PKG_VERSION"))
    }

    /// Where a request for `url` is actually sent. Only the public origin is
    /// ever forwarded, always to the upstream.
    pub fn target(&self, url: &Url) -> Result<Url, TransportError> {
        if url.origin() != self.public.origin() {
            return Err(TransportError::request(
                url.as_str(),
                "not addressed to the public origin",
            ));
        }

        let mut target = self.upstream.clone();
        target.set_path(url.path());
        target.set_query(url.query());
        Ok(target)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<CachedResponse, TransportError> {
        let target = self.target(&request.url)?;
        debug!(url = %request.url, target = %target, method = %request.method, "fetching");

        let mut builder = self
            .client
            .request(request.method.clone(), target.clone())
            .headers(forwardable(&request.headers));
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout {
                    url: target.to_string(),
                }
            } else {
                TransportError::request(target.as_str(), err)
            }
        })?;

        let status = response.status();
        let headers = forwardable(response.headers());
        let body = response.bytes().await.map_err(|err| TransportError::Body {
            url: target.to_string(),
            reason: err.to_string(),
        })?;

        Ok(CachedResponse::new(status, headers, body))
    }
}

/// Copy of `headers` without hop-by-hop and framing headers.
fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in [
        header::CONNECTION,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
        header::HOST,
        header::CONTENT_LENGTH,
    ] {
        forwarded.remove(&name);
    }
    forwarded
}
