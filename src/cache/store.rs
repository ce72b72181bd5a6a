//! Cache store contract.
//!
//! A store holds named namespaces; each namespace maps request keys to
//! responses. Writes to one key are atomic and the last writer wins. Nothing
//! spans more than one key.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{CachedResponse, NamespaceName, RequestKey};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry `{key}` could not be decoded: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("failed to fetch `{url}` for caching: {reason}")]
    Fetch { url: String, reason: String },
}

impl StoreError {
    pub fn corrupt(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// The set of namespaces.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open the namespace, creating it when missing.
    async fn open(&self, name: &NamespaceName) -> Result<Arc<dyn CacheNamespace>, StoreError>;

    async fn keys(&self) -> Result<Vec<NamespaceName>, StoreError>;

    /// Returns `false` when the namespace did not exist.
    async fn delete(&self, name: &NamespaceName) -> Result<bool, StoreError>;
}

/// Entries of one namespace.
#[async_trait]
pub trait CacheNamespace: Send + Sync {
    fn name(&self) -> &NamespaceName;

    async fn match_key(&self, key: &RequestKey) -> Result<Option<CachedResponse>, StoreError>;

    async fn put(&self, key: RequestKey, response: CachedResponse) -> Result<(), StoreError>;

    async fn delete(&self, key: &RequestKey) -> Result<bool, StoreError>;

    async fn keys(&self) -> Result<Vec<RequestKey>, StoreError>;
}
