//! Cache generation lifecycle.
//!
//! ```text
//! Idle -> Populating -> Populated -> CuttingOver -> Active
//! ```
//!
//! Startup pre-populates the current namespace on a best-effort basis.
//! Cutover deletes every other namespace and claims control, after which this
//! instance serves requests.

use std::sync::{Arc, RwLock};

use futures::future::join_all;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::application::transport::Transport;
use crate::cache::lock::{rw_read, rw_write};
use crate::cache::{CacheConfig, CacheStorage, NamespaceHandle, StoreError};
use crate::domain::{GenerationId, InterceptedRequest, NamespaceName};

const SOURCE: &str = "worker::lifecycle";
pub(crate) const METRIC_POPULATE_FAILED: &str = "riparo_populate_failed_total";
pub(crate) const METRIC_GENERATION_DELETED: &str = "riparo_generation_deleted_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Populating,
    Populated,
    CuttingOver,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub path: String,
    pub reason: String,
}

/// What a startup managed to cache.
#[derive(Debug, Clone)]
pub struct StartupReport {
    pub namespace: NamespaceName,
    pub cached: Vec<String>,
    pub failed: Vec<EntryFailure>,
}

impl StartupReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionFailure {
    pub namespace: NamespaceName,
    pub reason: String,
}

/// What a cutover removed.
#[derive(Debug, Clone)]
pub struct CutoverReport {
    pub retained: NamespaceName,
    pub deleted: Vec<NamespaceName>,
    pub failed: Vec<DeletionFailure>,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to open namespace `{namespace}`: {source}")]
    Open {
        namespace: NamespaceName,
        #[source]
        source: StoreError,
    },
    #[error("failed to list namespaces: {0}")]
    List(#[source] StoreError),
    #[error("cutover requires a populated generation (state: {0:?})")]
    NotPopulated(LifecycleState),
}

pub struct LifecycleManager {
    generation: GenerationId,
    manifest: Vec<String>,
    origin: Url,
    handle: NamespaceHandle,
    transport: Arc<dyn Transport>,
    state: RwLock<LifecycleState>,
}

impl LifecycleManager {
    pub fn new(
        config: &CacheConfig,
        origin: Url,
        storage: Arc<dyn CacheStorage>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            generation: config.generation.clone(),
            manifest: config.manifest.clone(),
            origin,
            handle: NamespaceHandle::new(storage, config.namespace()),
            transport,
            state: RwLock::new(LifecycleState::Idle),
        }
    }

    pub fn generation(&self) -> &GenerationId {
        &self.generation
    }

    pub fn namespace(&self) -> &NamespaceName {
        self.handle.name()
    }

    /// Handle on the current namespace, shared with the strategies.
    pub fn handle(&self) -> &NamespaceHandle {
        &self.handle
    }

    pub fn state(&self) -> LifecycleState {
        *rw_read(&self.state, SOURCE, "state")
    }

    /// True once cutover has claimed control.
    pub fn controls_clients(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    fn set_state(&self, state: LifecycleState) {
        *rw_write(&self.state, SOURCE, "set_state") = state;
    }

    /// Pre-populate the current namespace from the manifest.
    ///
    /// Each entry is fetched independently; a failed entry is recorded and the
    /// rest continue. Only failing to open the namespace is an error.
    #[instrument(skip_all, fields(namespace = %self.handle.name(), entries = self.manifest.len()))]
    pub async fn startup(&self) -> Result<StartupReport, LifecycleError> {
        let previous = self.state();
        if previous != LifecycleState::Active {
            self.set_state(LifecycleState::Populating);
        }

        if let Err(source) = self.handle.open().await {
            self.set_state(previous);
            return Err(LifecycleError::Open {
                namespace: self.handle.name().clone(),
                source,
            });
        }

        let attempts = self.manifest.iter().map(|path| self.populate_entry(path));
        let results = join_all(attempts).await;

        let mut report = StartupReport {
            namespace: self.handle.name().clone(),
            cached: Vec::new(),
            failed: Vec::new(),
        };
        for (path, result) in self.manifest.iter().zip(results) {
            match result {
                Ok(()) => report.cached.push(path.clone()),
                Err(reason) => {
                    warn!(path = %path, reason = %reason, "Failed to cache manifest entry");
                    counter!(METRIC_POPULATE_FAILED).increment(1);
                    report.failed.push(EntryFailure {
                        path: path.clone(),
                        reason,
                    });
                }
            }
        }

        if previous != LifecycleState::Active {
            self.set_state(LifecycleState::Populated);
        }
        info!(
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Startup population finished"
        );
        Ok(report)
    }

    async fn populate_entry(&self, path: &str) -> Result<(), String> {
        let url = self
            .origin
            .join(path)
            .map_err(|err| format!("invalid manifest path: {err}"))?;
        self.handle
            .add(self.transport.as_ref(), &InterceptedRequest::get(url))
            .await
            .map_err(|err| err.to_string())
    }

    /// Delete every namespace except the current one, then claim control.
    ///
    /// Deletion failures are recorded and do not stop the transition.
    #[instrument(skip_all, fields(namespace = %self.handle.name()))]
    pub async fn cutover(&self) -> Result<CutoverReport, LifecycleError> {
        let previous = self.state();
        if !matches!(previous, LifecycleState::Populated | LifecycleState::Active) {
            return Err(LifecycleError::NotPopulated(previous));
        }
        self.set_state(LifecycleState::CuttingOver);

        let storage = self.handle.storage();
        let names = match storage.keys().await {
            Ok(names) => names,
            Err(err) => {
                self.set_state(previous);
                return Err(LifecycleError::List(err));
            }
        };

        let current = self.handle.name();
        let stale: Vec<NamespaceName> = names.into_iter().filter(|name| name != current).collect();
        let deletions = stale.iter().map(|name| storage.delete(name));
        let results = join_all(deletions).await;

        let mut report = CutoverReport {
            retained: current.clone(),
            deleted: Vec::new(),
            failed: Vec::new(),
        };
        for (name, result) in stale.into_iter().zip(results) {
            match result {
                Ok(true) => {
                    counter!(METRIC_GENERATION_DELETED).increment(1);
                    info!(stale = %name, "Deleted stale namespace");
                    report.deleted.push(name);
                }
                Ok(false) => debug!(stale = %name, "Stale namespace already gone"),
                Err(err) => {
                    warn!(stale = %name, error = %err, "Failed to delete stale namespace");
                    report.failed.push(DeletionFailure {
                        namespace: name,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if let Err(err) = self.handle.open().await {
            warn!(error = %err, "Current namespace could not be reopened after cutover");
        }

        self.set_state(LifecycleState::Active);
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Cutover finished, serving requests"
        );
        Ok(report)
    }
}
