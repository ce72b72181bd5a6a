//! Shared fixtures for worker tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::StatusCode;
use url::Url;

use crate::application::transport::{Transport, TransportError};
use crate::cache::{CacheConfig, CacheNamespace, CacheStorage, MemoryCacheStorage, StoreError};
use crate::domain::{CachedResponse, GenerationId, InterceptedRequest, NamespaceName, RequestKey};

pub(crate) fn origin() -> Url {
    Url::parse("https://blog.example/").expect("origin")
}

pub(crate) fn config_with_manifest(generation: &str, manifest: &[&str]) -> CacheConfig {
    let mut config = CacheConfig::new(GenerationId::new(generation).expect("generation"));
    config.manifest = manifest.iter().map(|path| path.to_string()).collect();
    config
}

enum Route {
    Respond(CachedResponse),
    Fail,
}

/// Path-keyed fake network. Unknown paths fail like an unreachable host.
#[derive(Default)]
pub(crate) struct StubTransport {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<HashMap<String, usize>>,
    offline: AtomicBool,
}

impl StubTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn serve(&self, path: &str, body: &'static str) {
        let response = CachedResponse::with_body(StatusCode::OK, "text/html", body);
        self.route(path, Route::Respond(response));
    }

    pub(crate) fn serve_status(&self, path: &str, status: StatusCode) {
        let response = CachedResponse::with_body(status, "text/html", "error page");
        self.route(path, Route::Respond(response));
    }

    pub(crate) fn respond(&self, path: &str, response: CachedResponse) {
        self.route(path, Route::Respond(response));
    }

    pub(crate) fn fail(&self, path: &str) {
        self.route(path, Route::Fail);
    }

    pub(crate) fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self, path: &str) -> usize {
        self.calls
            .lock()
            .expect("calls")
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().expect("calls").values().sum()
    }

    fn route(&self, path: &str, route: Route) {
        self.routes
            .lock()
            .expect("routes")
            .insert(path.to_string(), route);
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<CachedResponse, TransportError> {
        let path = request.path().to_string();
        *self
            .calls
            .lock()
            .expect("calls")
            .entry(path.clone())
            .or_default() += 1;

        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::request(request.url.as_str(), "offline"));
        }

        match self.routes.lock().expect("routes").get(&path) {
            Some(Route::Respond(response)) => Ok(response.clone()),
            Some(Route::Fail) | None => {
                Err(TransportError::request(request.url.as_str(), "unreachable"))
            }
        }
    }
}

fn broken(what: &str) -> StoreError {
    StoreError::Io(io::Error::other(format!("{what}: disk unavailable")))
}

/// In-memory store with switchable faults.
#[derive(Default)]
pub(crate) struct FaultyStorage {
    inner: MemoryCacheStorage,
    fail_open: AtomicBool,
    fail_keys: AtomicBool,
    undeletable: Mutex<HashSet<NamespaceName>>,
    unreadable: Arc<Mutex<HashSet<RequestKey>>>,
}

impl FaultyStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_keys(&self, fail: bool) {
        self.fail_keys.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn refuse_delete(&self, name: &str) {
        self.undeletable
            .lock()
            .expect("undeletable")
            .insert(NamespaceName::from(name));
    }

    pub(crate) fn refuse_read(&self, key: RequestKey) {
        self.unreadable.lock().expect("unreadable").insert(key);
    }
}

#[async_trait]
impl CacheStorage for FaultyStorage {
    async fn open(&self, name: &NamespaceName) -> Result<Arc<dyn CacheNamespace>, StoreError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(broken("open"));
        }
        let inner = self.inner.open(name).await?;
        Ok(Arc::new(FaultyNamespace {
            inner,
            unreadable: Arc::clone(&self.unreadable),
        }))
    }

    async fn keys(&self) -> Result<Vec<NamespaceName>, StoreError> {
        if self.fail_keys.load(Ordering::SeqCst) {
            return Err(broken("keys"));
        }
        self.inner.keys().await
    }

    async fn delete(&self, name: &NamespaceName) -> Result<bool, StoreError> {
        if self.undeletable.lock().expect("undeletable").contains(name) {
            return Err(broken("delete"));
        }
        self.inner.delete(name).await
    }
}

struct FaultyNamespace {
    inner: Arc<dyn CacheNamespace>,
    unreadable: Arc<Mutex<HashSet<RequestKey>>>,
}

#[async_trait]
impl CacheNamespace for FaultyNamespace {
    fn name(&self) -> &NamespaceName {
        self.inner.name()
    }

    async fn match_key(&self, key: &RequestKey) -> Result<Option<CachedResponse>, StoreError> {
        if self.unreadable.lock().expect("unreadable").contains(key) {
            return Err(StoreError::corrupt(key.as_str(), "truncated entry"));
        }
        self.inner.match_key(key).await
    }

    async fn put(&self, key: RequestKey, response: CachedResponse) -> Result<(), StoreError> {
        self.inner.put(key, response).await
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }

    async fn keys(&self) -> Result<Vec<RequestKey>, StoreError> {
        self.inner.keys().await
    }
}
