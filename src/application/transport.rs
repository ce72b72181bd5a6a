//! Transport trait describing the network adapter.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{CachedResponse, InterceptedRequest};

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request to `{url}` failed: {reason}")]
    Request { url: String, reason: String },
    #[error("request to `{url}` timed out")]
    Timeout { url: String },
    #[error("failed to read response body from `{url}`: {reason}")]
    Body { url: String, reason: String },
}

impl TransportError {
    pub fn request(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Request {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// Issues requests against the network.
///
/// Any received response is `Ok`, whatever its status; `Err` means no response
/// arrived at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<CachedResponse, TransportError>;
}
