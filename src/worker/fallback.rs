//! Last-resort responses when neither network nor cache can answer.

use tracing::error;

use crate::cache::NamespaceHandle;
use crate::domain::{CachedResponse, RequestKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    Document,
    Asset,
}

impl FallbackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Asset => "asset",
        }
    }
}

#[derive(Clone)]
pub struct FallbackResolver {
    handle: NamespaceHandle,
    offline_key: RequestKey,
}

impl FallbackResolver {
    pub fn new(handle: NamespaceHandle, offline_key: RequestKey) -> Self {
        Self {
            handle,
            offline_key,
        }
    }

    /// Documents get the cached offline page; assets get an empty 404.
    ///
    /// `None` only when the offline page is missing from the current
    /// namespace, which means the manifest or startup was misconfigured.
    pub async fn resolve(&self, kind: FallbackKind) -> Option<CachedResponse> {
        match kind {
            FallbackKind::Asset => Some(CachedResponse::not_found()),
            FallbackKind::Document => match self.handle.lookup(&self.offline_key).await {
                Ok(Some(page)) => Some(page),
                Ok(None) => {
                    error!(
                        namespace = %self.handle.name(),
                        offline_page = %self.offline_key,
                        "Offline page missing from cache; was it in the manifest?"
                    );
                    None
                }
                Err(err) => {
                    error!(
                        namespace = %self.handle.name(),
                        offline_page = %self.offline_key,
                        error = %err,
                        "Offline page could not be read"
                    );
                    None
                }
            },
        }
    }
}
