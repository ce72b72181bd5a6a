//! The current namespace, bound to a store.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::application::transport::Transport;
use crate::domain::{CachedResponse, InterceptedRequest, NamespaceName, RequestKey};

use super::store::{CacheNamespace, CacheStorage, StoreError};

/// Every operation reopens the namespace by name, so a handle never writes
/// into a namespace object that a cutover has already dropped.
#[derive(Clone)]
pub struct NamespaceHandle {
    storage: Arc<dyn CacheStorage>,
    name: NamespaceName,
}

impl NamespaceHandle {
    pub fn new(storage: Arc<dyn CacheStorage>, name: NamespaceName) -> Self {
        Self { storage, name }
    }

    pub fn name(&self) -> &NamespaceName {
        &self.name
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub async fn open(&self) -> Result<Arc<dyn CacheNamespace>, StoreError> {
        self.storage.open(&self.name).await
    }

    pub async fn lookup(&self, key: &RequestKey) -> Result<Option<CachedResponse>, StoreError> {
        self.open().await?.match_key(key).await
    }

    pub async fn put(&self, key: RequestKey, response: CachedResponse) -> Result<(), StoreError> {
        self.open().await?.put(key, response).await
    }

    /// Fetch and store in one step. Anything but a shareable 2xx response is
    /// an error and nothing is stored.
    #[instrument(skip_all, fields(namespace = %self.name, url = %request.url))]
    pub async fn add(
        &self,
        transport: &dyn Transport,
        request: &InterceptedRequest,
    ) -> Result<(), StoreError> {
        let response = transport
            .fetch(request)
            .await
            .map_err(|err| StoreError::Fetch {
                url: request.url.to_string(),
                reason: err.to_string(),
            })?;

        if !response.is_success() {
            return Err(StoreError::Fetch {
                url: request.url.to_string(),
                reason: format!("unexpected status {}", response.status),
            });
        }
        if !response.is_shareable() {
            return Err(StoreError::Fetch {
                url: request.url.to_string(),
                reason: "response is private to one client".to_string(),
            });
        }

        self.put(request.key(), response).await?;
        debug!("entry added");
        Ok(())
    }
}
