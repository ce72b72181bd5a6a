//! Offline worker: request interception and cache generation lifecycle.
//!
//! The worker answers three events. Startup pre-populates the current
//! generation, cutover retires older generations, and each request is
//! classified and served by the matching strategy.

pub mod classifier;
pub mod events;
pub mod fallback;
pub mod lifecycle;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};
use url::Url;

use crate::application::transport::Transport;
use crate::cache::{CacheConfig, CacheStorage};
use crate::domain::error::DomainError;
use crate::domain::{InterceptedRequest, RequestKey};

pub use classifier::{ClassifierRules, DocumentScope, RequestClassifier, RequestKind};
pub use events::{
    Completion, CutoverEvent, Dispatched, EventDispatcher, EventHandler, EventKind,
    LifecycleEvent, Reply, RequestEvent, StartupEvent,
};
pub use fallback::{FallbackKind, FallbackResolver};
pub use lifecycle::{
    CutoverReport, DeletionFailure, EntryFailure, LifecycleError, LifecycleManager,
    LifecycleState, StartupReport,
};
pub use strategy::{Outcome, ResponseSource, StrategyExecutor};

pub struct OfflineWorker {
    lifecycle: Arc<LifecycleManager>,
    classifier: RequestClassifier,
    executor: StrategyExecutor,
}

impl OfflineWorker {
    pub fn new(
        config: &CacheConfig,
        origin: Url,
        rules: ClassifierRules,
        storage: Arc<dyn CacheStorage>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, DomainError> {
        let offline_key = RequestKey::resolve(&origin, &config.offline_path)?;
        let classifier = RequestClassifier::new(&origin, rules);
        let lifecycle = Arc::new(LifecycleManager::new(
            config,
            origin,
            storage,
            Arc::clone(&transport),
        ));
        let handle = lifecycle.handle().clone();
        let fallback = FallbackResolver::new(handle.clone(), offline_key);
        let executor = StrategyExecutor::new(handle, transport, fallback);

        Ok(Self {
            lifecycle,
            classifier,
            executor,
        })
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn classifier(&self) -> &RequestClassifier {
        &self.classifier
    }

    /// Dispatcher with this worker registered for every event.
    pub fn into_dispatcher(self: Arc<Self>) -> EventDispatcher {
        let mut dispatcher = EventDispatcher::new();
        dispatcher
            .register(EventKind::Startup, self.clone())
            .register(EventKind::Cutover, self.clone())
            .register(EventKind::Request, self);
        dispatcher
    }

    /// `None` means the request is not intercepted and goes to the network
    /// as is.
    pub async fn intercept(
        &self,
        request: &InterceptedRequest,
        completion: &Completion,
    ) -> Option<Outcome> {
        if !self.lifecycle.controls_clients() {
            debug!(url = %request.url, state = ?self.lifecycle.state(), "not in control yet");
            return None;
        }

        let kind = self.classifier.classify(request);
        debug!(url = %request.url, kind = kind.as_str(), "classified request");
        match kind {
            RequestKind::NonCacheable => None,
            RequestKind::Document => Some(self.executor.network_first(request, completion).await),
            RequestKind::StaticAsset => Some(self.executor.cache_first(request, completion).await),
        }
    }
}

#[async_trait]
impl EventHandler for OfflineWorker {
    async fn handle(&self, event: &LifecycleEvent, completion: &Completion) {
        match event {
            LifecycleEvent::Startup(startup) => {
                debug!(generation = %startup.generation, namespace = %startup.namespace, "startup");
                let lifecycle = Arc::clone(&self.lifecycle);
                let reply = startup.reply().clone();
                completion.wait_until(async move {
                    let result = lifecycle.startup().await;
                    if let Err(err) = &result {
                        error!(error = %err, "startup failed");
                    }
                    reply.send(result);
                });
            }
            LifecycleEvent::Cutover(cutover) => {
                debug!(namespace = %cutover.namespace, "cutover");
                let lifecycle = Arc::clone(&self.lifecycle);
                let reply = cutover.reply().clone();
                completion.wait_until(async move {
                    let result = lifecycle.cutover().await;
                    if let Err(err) = &result {
                        error!(error = %err, "cutover failed");
                    }
                    reply.send(result);
                });
            }
            LifecycleEvent::Request(request) => {
                if let Some(outcome) = self.intercept(request.request(), completion).await {
                    request.respond_with(outcome);
                }
            }
        }
    }
}
