//! In-process cache store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domain::{CachedResponse, NamespaceName, RequestKey};

use super::lock::{rw_read, rw_write};
use super::store::{CacheNamespace, CacheStorage, StoreError};

const SOURCE: &str = "cache::memory";

/// Namespaces held in memory; lost on restart.
#[derive(Default)]
pub struct MemoryCacheStorage {
    namespaces: RwLock<BTreeMap<NamespaceName, Arc<MemoryNamespace>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &NamespaceName) -> Result<Arc<dyn CacheNamespace>, StoreError> {
        if let Some(existing) = rw_read(&self.namespaces, SOURCE, "open.lookup").get(name) {
            return Ok(existing.clone());
        }

        let namespace = rw_write(&self.namespaces, SOURCE, "open.create")
            .entry(name.clone())
            .or_insert_with(|| Arc::new(MemoryNamespace::new(name.clone())))
            .clone();
        Ok(namespace)
    }

    async fn keys(&self) -> Result<Vec<NamespaceName>, StoreError> {
        Ok(rw_read(&self.namespaces, SOURCE, "keys")
            .keys()
            .cloned()
            .collect())
    }

    async fn delete(&self, name: &NamespaceName) -> Result<bool, StoreError> {
        Ok(rw_write(&self.namespaces, SOURCE, "delete")
            .remove(name)
            .is_some())
    }
}

/// One in-memory namespace. Handles stay usable after the namespace is
/// deleted from the storage, but their entries are no longer reachable by name.
pub struct MemoryNamespace {
    name: NamespaceName,
    entries: RwLock<HashMap<RequestKey, CachedResponse>>,
}

impl MemoryNamespace {
    fn new(name: NamespaceName) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CacheNamespace for MemoryNamespace {
    fn name(&self) -> &NamespaceName {
        &self.name
    }

    async fn match_key(&self, key: &RequestKey) -> Result<Option<CachedResponse>, StoreError> {
        Ok(rw_read(&self.entries, SOURCE, "match_key").get(key).cloned())
    }

    async fn put(&self, key: RequestKey, response: CachedResponse) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "put").insert(key, response);
        Ok(())
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool, StoreError> {
        Ok(rw_write(&self.entries, SOURCE, "delete")
            .remove(key)
            .is_some())
    }

    async fn keys(&self) -> Result<Vec<RequestKey>, StoreError> {
        let mut keys: Vec<RequestKey> = rw_read(&self.entries, SOURCE, "keys")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
