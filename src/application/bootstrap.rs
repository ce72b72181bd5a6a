//! Wiring between settings, store, network and worker.
//!
//! Lifecycle transitions go through the event dispatcher exactly as a
//! request does; [`Runtime`] settles each event and returns the result the
//! handler sent back on it.

use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheConfig, CacheStorage};
use crate::domain::NamespaceName;
use crate::worker::{
    ClassifierRules, CutoverEvent, CutoverReport, EventDispatcher, LifecycleEvent,
    OfflineWorker, Reply, StartupEvent, StartupReport,
};

use super::error::AppError;
use super::transport::Transport;

pub struct Runtime {
    worker: Arc<OfflineWorker>,
    dispatcher: Arc<EventDispatcher>,
    storage: Arc<dyn CacheStorage>,
    transport: Arc<dyn Transport>,
}

impl Runtime {
    pub fn new(
        config: &CacheConfig,
        origin: Url,
        rules: ClassifierRules,
        storage: Arc<dyn CacheStorage>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, AppError> {
        if !config.manifest_contains_offline_page() {
            return Err(AppError::validation(format!(
                "manifest does not include the offline page `{}`",
                config.offline_path
            )));
        }

        let worker = Arc::new(OfflineWorker::new(
            config,
            origin,
            rules,
            Arc::clone(&storage),
            Arc::clone(&transport),
        )?);
        let dispatcher = Arc::new(Arc::clone(&worker).into_dispatcher());

        Ok(Self {
            worker,
            dispatcher,
            storage,
            transport,
        })
    }

    pub fn worker(&self) -> &Arc<OfflineWorker> {
        &self.worker
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run startup to completion.
    pub async fn startup(&self) -> Result<StartupReport, AppError> {
        let lifecycle = self.worker.lifecycle();
        let event = StartupEvent::new(
            lifecycle.generation().clone(),
            lifecycle.namespace().clone(),
        );
        let reply = event.reply().clone();
        self.dispatcher
            .dispatch(LifecycleEvent::Startup(event))
            .await
            .settled()
            .await;

        let report = received(reply, "startup")?;
        if !report.is_complete() {
            warn!(
                namespace = %report.namespace,
                failed = report.failed.len(),
                "Startup left manifest entries uncached"
            );
        }
        Ok(report)
    }

    /// Run cutover to completion; afterwards requests are intercepted.
    pub async fn cutover(&self) -> Result<CutoverReport, AppError> {
        let lifecycle = self.worker.lifecycle();
        let event = CutoverEvent::new(lifecycle.namespace().clone());
        let reply = event.reply().clone();
        self.dispatcher
            .dispatch(LifecycleEvent::Cutover(event))
            .await
            .settled()
            .await;

        let report = received(reply, "cutover")?;
        info!(
            retained = %report.retained,
            deleted = report.deleted.len(),
            "Cutover complete"
        );
        Ok(report)
    }

    /// Every namespace currently in the store.
    pub async fn generations(&self) -> Result<Vec<NamespaceName>, AppError> {
        Ok(self.storage.keys().await?)
    }
}

fn received<T>(reply: Reply<T>, event: &str) -> Result<T, AppError> {
    match reply.take() {
        Some(result) => Ok(result?),
        None => Err(AppError::unexpected(format!(
            "{event} finished without reporting a result"
        ))),
    }
}
