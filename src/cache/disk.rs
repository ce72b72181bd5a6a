//! Filesystem cache store.
//!
//! Layout: one directory per namespace (hex-encoded name) under the root, one
//! JSON file per entry named by the SHA-256 of the request key. Entries are
//! written to a temporary file and renamed into place, so readers never see a
//! partial entry.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{CachedResponse, NamespaceName, RequestKey};

use super::store::{CacheNamespace, CacheStorage, StoreError};

const ENTRY_EXTENSION: &str = "json";

/// Namespaces persisted under a root directory; survives restarts.
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn namespace_dir(&self, name: &NamespaceName) -> PathBuf {
        self.root.join(hex::encode(name.as_str()))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &NamespaceName) -> Result<Arc<dyn CacheNamespace>, StoreError> {
        let dir = self.namespace_dir(name);
        fs::create_dir_all(&dir).await?;
        Ok(Arc::new(DiskNamespace {
            name: name.clone(),
            dir,
        }))
    }

    async fn keys(&self) -> Result<Vec<NamespaceName>, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name();
            let decoded = dir_name
                .to_str()
                .and_then(|encoded| hex::decode(encoded).ok())
                .and_then(|raw| String::from_utf8(raw).ok());
            match decoded {
                Some(name) => names.push(NamespaceName::from(name)),
                None => debug!(
                    directory = ?dir_name,
                    "skipping directory that is not a cache namespace"
                ),
            }
        }

        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &NamespaceName) -> Result<bool, StoreError> {
        match fs::remove_dir_all(self.namespace_dir(name)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

pub struct DiskNamespace {
    name: NamespaceName,
    dir: PathBuf,
}

impl DiskNamespace {
    fn entry_path(&self, key: &RequestKey) -> PathBuf {
        let digest = Sha256::digest(key.as_str().as_bytes());
        self.dir
            .join(format!("{}.{ENTRY_EXTENSION}", hex::encode(digest.as_slice())))
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<StoredEntry>, StoreError> {
        let raw = match fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| StoreError::corrupt(path.display().to_string(), err))
    }
}

#[async_trait]
impl CacheNamespace for DiskNamespace {
    fn name(&self) -> &NamespaceName {
        &self.name
    }

    async fn match_key(&self, key: &RequestKey) -> Result<Option<CachedResponse>, StoreError> {
        match self.read_entry(&self.entry_path(key)).await? {
            Some(entry) => entry.into_response().map(Some),
            None => Ok(None),
        }
    }

    async fn put(&self, key: RequestKey, response: CachedResponse) -> Result<(), StoreError> {
        let path = self.entry_path(&key);
        let entry = StoredEntry::from_response(key, &response);
        let encoded = serde_json::to_vec(&entry)
            .map_err(|err| StoreError::corrupt(entry.key.as_str(), err))?;

        let staging = path.with_extension(format!("{ENTRY_EXTENSION}.tmp-{}", Uuid::new_v4()));
        fs::write(&staging, encoded).await?;
        if let Err(err) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool, StoreError> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<RequestKey>, StoreError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(stored) = self.read_entry(&path).await? {
                keys.push(stored.key);
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// Header values are stored as base64 of their raw bytes, like the body, so
/// values outside visible ASCII round-trip unchanged.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: RequestKey,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    stored_at: OffsetDateTime,
}

impl StoredEntry {
    fn from_response(key: RequestKey, response: &CachedResponse) -> Self {
        Self {
            key,
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| (name.to_string(), STANDARD.encode(value.as_bytes())))
                .collect(),
            body: STANDARD.encode(&response.body),
            stored_at: OffsetDateTime::now_utc(),
        }
    }

    fn into_response(self) -> Result<CachedResponse, StoreError> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|err| StoreError::corrupt(self.key.as_str(), err))?;
        let body = STANDARD
            .decode(self.body.as_bytes())
            .map_err(|err| StoreError::corrupt(self.key.as_str(), err))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| StoreError::corrupt(self.key.as_str(), err))?;
            let raw = STANDARD
                .decode(value.as_bytes())
                .map_err(|err| StoreError::corrupt(self.key.as_str(), err))?;
            let value = HeaderValue::from_bytes(&raw)
                .map_err(|err| StoreError::corrupt(self.key.as_str(), err))?;
            headers.append(name, value);
        }

        Ok(CachedResponse::new(status, headers, Bytes::from(body)))
    }
}
