//! End-to-end behaviour of the proxy router over an in-memory store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use axum::response::Response;
use http_body_util::BodyExt;
use tokio::sync::Mutex;
use tower::ServiceExt;
use url::Url;

use riparo::application::bootstrap::Runtime;
use riparo::application::transport::{Transport, TransportError};
use riparo::cache::{CacheConfig, CacheStorage, MemoryCacheStorage};
use riparo::domain::{CachedResponse, GenerationId, InterceptedRequest};
use riparo::infra::http::{CUTOVER_PATH, ProxyState, build_router};
use riparo::worker::{ClassifierRules, LifecycleState};

#[derive(Default)]
struct FakeUpstream {
    pages: Mutex<HashMap<String, (StatusCode, &'static str)>>,
    seen: Mutex<Vec<(Method, String)>>,
    down: AtomicBool,
}

impl FakeUpstream {
    async fn page(&self, path: &str, body: &'static str) {
        self.pages
            .lock()
            .await
            .insert(path.to_string(), (StatusCode::OK, body));
    }

    async fn seen(&self) -> Vec<(Method, String)> {
        self.seen.lock().await.clone()
    }

    fn take_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FakeUpstream {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<CachedResponse, TransportError> {
        self.seen
            .lock()
            .await
            .push((request.method.clone(), request.path().to_string()));
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::request(request.url.as_str(), "connection refused"));
        }

        let pages = self.pages.lock().await;
        let (status, body) = pages
            .get(request.path())
            .copied()
            .unwrap_or((StatusCode::NOT_FOUND, "no such page"));
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "text/html".parse().expect("header"));
        Ok(CachedResponse::new(status, headers, body.into()))
    }
}

fn public_url() -> Url {
    Url::parse("https://blog.example/").expect("url")
}

async fn setup(
    upstream: Arc<FakeUpstream>,
    activate: bool,
) -> (ProxyState, Arc<dyn CacheStorage>) {
    upstream.page("/", "home").await;
    upstream.page("/offline.html", "you are offline").await;
    upstream.page("/css/light.css", "body{}").await;

    let mut config = CacheConfig::new(GenerationId::new("v2").expect("generation"));
    config.manifest = vec![
        "/".to_string(),
        "/css/light.css".to_string(),
        "/offline.html".to_string(),
    ];

    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryCacheStorage::new());
    storage
        .open(&"riparo-v1".into())
        .await
        .expect("previous generation");

    let runtime = Runtime::new(
        &config,
        public_url(),
        ClassifierRules::default(),
        Arc::clone(&storage),
        upstream,
    )
    .expect("runtime");
    runtime.startup().await.expect("startup");
    if activate {
        runtime.cutover().await.expect("cutover");
    }

    let state = ProxyState {
        runtime: Arc::new(runtime),
        public_url: public_url(),
        body_limit: 1024,
    };
    (state, storage)
}

fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .expect("request")
}

async fn body_text(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

fn source(response: &Response) -> Option<&str> {
    response
        .headers()
        .get("x-riparo-source")
        .and_then(|value| value.to_str().ok())
}

#[tokio::test]
async fn documents_are_served_live_then_from_cache_when_offline() {
    let upstream = Arc::new(FakeUpstream::default());
    let (state, _) = setup(Arc::clone(&upstream), true).await;
    let router = build_router(state, false);

    let online = router.clone().oneshot(get("/")).await.expect("response");
    assert_eq!(online.status(), StatusCode::OK);
    assert_eq!(source(&online), Some("network"));
    assert_eq!(body_text(online).await, "home");

    upstream.take_down();

    let cached = router.clone().oneshot(get("/")).await.expect("response");
    assert_eq!(source(&cached), Some("cache"));
    assert_eq!(body_text(cached).await, "home");

    let unknown = router.oneshot(get("/post/x")).await.expect("response");
    assert_eq!(unknown.status(), StatusCode::OK);
    assert_eq!(source(&unknown), Some("fallback"));
    assert_eq!(body_text(unknown).await, "you are offline");
}

#[tokio::test]
async fn network_error_pages_pass_through_for_documents() {
    let upstream = Arc::new(FakeUpstream::default());
    let (state, _) = setup(Arc::clone(&upstream), true).await;
    let router = build_router(state, false);

    let response = router.oneshot(get("/missing")).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(source(&response), Some("network"));
    assert_eq!(body_text(response).await, "no such page");
}

#[tokio::test]
async fn assets_come_from_cache_without_network() {
    let upstream = Arc::new(FakeUpstream::default());
    let (state, _) = setup(Arc::clone(&upstream), true).await;
    let router = build_router(state, false);
    let before = upstream.seen().await.len();

    let response = router
        .clone()
        .oneshot(get("/css/light.css"))
        .await
        .expect("response");
    assert_eq!(source(&response), Some("cache"));
    assert_eq!(upstream.seen().await.len(), before);

    upstream.take_down();
    let missing = router
        .oneshot(get("/images/cover.png"))
        .await
        .expect("response");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(source(&missing), Some("fallback"));
    assert!(body_text(missing).await.is_empty());
}

#[tokio::test]
async fn non_get_requests_are_forwarded_untouched() {
    let upstream = Arc::new(FakeUpstream::default());
    let (state, storage) = setup(Arc::clone(&upstream), true).await;
    let router = build_router(state, false);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/comments")
        .body(Body::from("hello"))
        .expect("request");
    let response = router.oneshot(request).await.expect("response");

    assert_eq!(source(&response), None);
    assert!(
        upstream
            .seen()
            .await
            .contains(&(Method::POST, "/comments".to_string()))
    );
    let current = storage.open(&"riparo-v2".into()).await.expect("open");
    assert_eq!(current.keys().await.expect("keys").len(), 3);
}

#[tokio::test]
async fn passthrough_failure_is_bad_gateway() {
    let upstream = Arc::new(FakeUpstream::default());
    let (state, _) = setup(Arc::clone(&upstream), false).await;
    let router = build_router(state, true);

    upstream.take_down();
    let response = router.oneshot(get("/")).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn manual_cutover_claims_control() {
    let upstream = Arc::new(FakeUpstream::default());
    let (state, storage) = setup(Arc::clone(&upstream), false).await;
    let runtime = Arc::clone(&state.runtime);
    let router = build_router(state, true);

    let before = router.clone().oneshot(get("/")).await.expect("response");
    assert_eq!(source(&before), None);
    assert_eq!(storage.keys().await.expect("keys").len(), 2);

    let trigger = Request::builder()
        .method(Method::POST)
        .uri(CUTOVER_PATH)
        .body(Body::empty())
        .expect("request");
    let response = router.clone().oneshot(trigger).await.expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(runtime.worker().lifecycle().state(), LifecycleState::Active);
    assert_eq!(storage.keys().await.expect("keys").len(), 1);

    let after = router.oneshot(get("/")).await.expect("response");
    assert_eq!(source(&after), Some("network"));
}

#[tokio::test]
async fn foreign_absolute_targets_are_refused_before_any_fetch() {
    let upstream = Arc::new(FakeUpstream::default());
    let (state, _) = setup(Arc::clone(&upstream), true).await;
    let before = upstream.seen().await.len();
    let router = build_router(state, false);

    let response = router
        .clone()
        .oneshot(get("http://127.0.0.1:9/secret"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::MISDIRECTED_REQUEST);
    assert!(source(&response).is_none());

    let response = router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("http://169.254.169.254/latest/meta-data")
                .body(Body::from("x"))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::MISDIRECTED_REQUEST);
    assert_eq!(upstream.seen().await.len(), before);
}

#[tokio::test]
async fn oversized_bodies_are_refused_without_forwarding() {
    let upstream = Arc::new(FakeUpstream::default());
    let (state, _) = setup(Arc::clone(&upstream), true).await;
    let before = upstream.seen().await.len();
    let router = build_router(state, false);

    let response = router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/comments")
                .body(Body::from(vec![b'x'; 4096]))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(upstream.seen().await.len(), before);
}
