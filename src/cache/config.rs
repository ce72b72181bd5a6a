//! Cache configuration.
//!
//! Names the current generation, the pre-population manifest and the store
//! backend. Built from the `[cache]` section of `riparo.toml`.

use std::path::PathBuf;

use crate::domain::{GenerationId, NamespaceName};

const DEFAULT_LOGICAL_NAME: &str = "riparo";
const DEFAULT_OFFLINE_PATH: &str = "/offline.html";
const DEFAULT_DISK_DIRECTORY: &str = ".riparo-cache";

/// Where namespaces live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Disk { directory: PathBuf },
}

impl StorageBackend {
    pub fn default_disk() -> Self {
        Self::Disk {
            directory: PathBuf::from(DEFAULT_DISK_DIRECTORY),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix shared by every generation of this cache.
    pub logical_name: String,
    /// Current deployment token.
    pub generation: GenerationId,
    /// Paths pre-populated at startup, in order.
    pub manifest: Vec<String>,
    /// Page served to navigations when both network and cache miss.
    pub offline_path: String,
    pub backend: StorageBackend,
    /// Run cutover right after startup instead of waiting for an explicit trigger.
    pub skip_waiting: bool,
}

impl CacheConfig {
    pub fn new(generation: GenerationId) -> Self {
        Self {
            logical_name: DEFAULT_LOGICAL_NAME.to_string(),
            generation,
            manifest: vec![DEFAULT_OFFLINE_PATH.to_string()],
            offline_path: DEFAULT_OFFLINE_PATH.to_string(),
            backend: StorageBackend::Memory,
            skip_waiting: true,
        }
    }

    /// The namespace this deployment reads and writes.
    pub fn namespace(&self) -> NamespaceName {
        NamespaceName::for_generation(&self.logical_name, &self.generation)
    }

    pub fn manifest_contains_offline_page(&self) -> bool {
        self.manifest.iter().any(|path| path == &self.offline_path)
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            logical_name: settings.name.clone(),
            generation: settings.generation.clone(),
            manifest: settings.manifest.clone(),
            offline_path: settings.offline_path.clone(),
            backend: settings.backend.clone(),
            skip_waiting: settings.skip_waiting,
        }
    }
}
