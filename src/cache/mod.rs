//! Riparo cache store.
//!
//! Responses are grouped into namespaces, one per deployment generation:
//!
//! - **Memory**: namespaces live for the lifetime of the process
//! - **Disk**: namespaces persist under a directory, so offline mode works
//!   across restarts
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! name = "til-blog"
//! generation = "v-1770026924"
//! manifest = ["/css/light.css", "/offline.html"]
//! offline_path = "/offline.html"
//! storage = "disk"
//! directory = ".riparo-cache"
//! ```

mod config;
mod disk;
mod handle;
pub(crate) mod lock;
mod memory;
mod store;

use std::sync::Arc;

pub use config::{CacheConfig, StorageBackend};
pub use disk::{DiskCacheStorage, DiskNamespace};
pub use handle::NamespaceHandle;
pub use memory::{MemoryCacheStorage, MemoryNamespace};
pub use store::{CacheNamespace, CacheStorage, StoreError};

/// Build the store selected by the configuration.
pub fn build_storage(backend: &StorageBackend) -> Arc<dyn CacheStorage> {
    match backend {
        StorageBackend::Memory => Arc::new(MemoryCacheStorage::new()),
        StorageBackend::Disk { directory } => Arc::new(DiskCacheStorage::new(directory.clone())),
    }
}
