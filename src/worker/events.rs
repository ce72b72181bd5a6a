//! Lifecycle events and their dispatch.
//!
//! Handlers are registered for a closed set of events. Each dispatch gets a
//! [`Completion`] token; work passed to [`Completion::wait_until`] keeps the
//! event open until it finishes, even after the handler has returned.
//! Startup and cutover results travel back to the dispatcher's caller through
//! a [`Reply`] carried on the event.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::cache::lock::mutex_lock;
use crate::domain::{GenerationId, InterceptedRequest, NamespaceName};

use super::lifecycle::{CutoverReport, LifecycleError, StartupReport};
use super::strategy::Outcome;

const SOURCE: &str = "worker::events";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Startup,
    Cutover,
    Request,
}

/// Result slot shared between an event and the work it spawns.
#[derive(Debug)]
pub struct Reply<T>(Arc<Mutex<Option<Result<T, LifecycleError>>>>);

impl<T> Reply<T> {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    /// The first result wins; later ones are dropped.
    pub fn send(&self, result: Result<T, LifecycleError>) {
        let mut slot = mutex_lock(&self.0, SOURCE, "reply.send");
        if slot.is_none() {
            *slot = Some(result);
        }
    }

    /// `None` when no handler produced a result.
    pub fn take(&self) -> Option<Result<T, LifecycleError>> {
        mutex_lock(&self.0, SOURCE, "reply.take").take()
    }
}

impl<T> Clone for Reply<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// A new generation should pre-populate its namespace.
#[derive(Debug, Clone)]
pub struct StartupEvent {
    pub generation: GenerationId,
    pub namespace: NamespaceName,
    reply: Reply<StartupReport>,
}

impl StartupEvent {
    pub fn new(generation: GenerationId, namespace: NamespaceName) -> Self {
        Self {
            generation,
            namespace,
            reply: Reply::new(),
        }
    }

    pub fn reply(&self) -> &Reply<StartupReport> {
        &self.reply
    }
}

/// The new generation should become the only one.
#[derive(Debug, Clone)]
pub struct CutoverEvent {
    pub namespace: NamespaceName,
    reply: Reply<CutoverReport>,
}

impl CutoverEvent {
    pub fn new(namespace: NamespaceName) -> Self {
        Self {
            namespace,
            reply: Reply::new(),
        }
    }

    pub fn reply(&self) -> &Reply<CutoverReport> {
        &self.reply
    }
}

/// An incoming request. Handlers answer through [`RequestEvent::respond_with`];
/// an event nobody answers falls through to the network untouched.
#[derive(Debug)]
pub struct RequestEvent {
    request: InterceptedRequest,
    outcome: Mutex<Option<Outcome>>,
}

impl RequestEvent {
    pub fn new(request: InterceptedRequest) -> Self {
        Self {
            request,
            outcome: Mutex::new(None),
        }
    }

    pub fn request(&self) -> &InterceptedRequest {
        &self.request
    }

    /// The first answer wins; later ones are dropped.
    pub fn respond_with(&self, outcome: Outcome) {
        let mut slot = mutex_lock(&self.outcome, SOURCE, "respond_with");
        if slot.is_some() {
            warn!(url = %self.request.url, "request already answered, ignoring response");
            return;
        }
        *slot = Some(outcome);
    }

    pub fn take_outcome(&self) -> Option<Outcome> {
        mutex_lock(&self.outcome, SOURCE, "take_outcome").take()
    }
}

#[derive(Debug)]
pub enum LifecycleEvent {
    Startup(StartupEvent),
    Cutover(CutoverEvent),
    Request(RequestEvent),
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Startup(_) => EventKind::Startup,
            Self::Cutover(_) => EventKind::Cutover,
            Self::Request(_) => EventKind::Request,
        }
    }
}

/// Deferred-completion token shared by the handlers of one dispatch.
#[derive(Clone, Default)]
pub struct Completion {
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` in the background and keep the event open until it is done.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        mutex_lock(&self.pending, SOURCE, "wait_until").push(handle);
    }

    pub fn pending(&self) -> usize {
        mutex_lock(&self.pending, SOURCE, "pending").len()
    }

    /// Wait for all extended work, including work registered while waiting.
    /// Returns how many tasks ran.
    pub async fn settled(&self) -> usize {
        let mut finished = 0;
        loop {
            let batch: Vec<JoinHandle<()>> =
                mutex_lock(&self.pending, SOURCE, "settled").drain(..).collect();
            if batch.is_empty() {
                return finished;
            }

            finished += batch.len();
            for result in join_all(batch).await {
                if let Err(err) = result {
                    error!(error = %err, "deferred event work did not complete");
                }
            }
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &LifecycleEvent, completion: &Completion);
}

/// Result of one dispatch.
pub struct Dispatched {
    pub event: LifecycleEvent,
    pub completion: Completion,
}

impl Dispatched {
    /// The answer to a request event, if any handler gave one.
    pub fn take_outcome(&self) -> Option<Outcome> {
        match &self.event {
            LifecycleEvent::Request(request) => request.take_outcome(),
            _ => None,
        }
    }

    pub async fn settled(self) -> LifecycleEvent {
        self.completion.settled().await;
        self.event
    }
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.handlers.entry(kind).or_default().push(handler);
        self
    }

    /// Run the handlers for the event in registration order.
    pub async fn dispatch(&self, event: LifecycleEvent) -> Dispatched {
        let completion = Completion::new();
        if let Some(handlers) = self.handlers.get(&event.kind()) {
            for handler in handlers {
                handler.handle(&event, &completion).await;
            }
        }
        Dispatched { event, completion }
    }
}
