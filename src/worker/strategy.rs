//! Network-first and cache-first strategies.
//!
//! Failures from either strategy go through a single recovery boundary that
//! picks between a cached copy, the offline page and an empty 404.

use std::sync::Arc;

use axum::http::StatusCode;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::application::transport::{Transport, TransportError};
use crate::cache::{NamespaceHandle, StoreError};
use crate::domain::{CachedResponse, InterceptedRequest};

use super::events::Completion;
use super::fallback::{FallbackKind, FallbackResolver};

pub(crate) const METRIC_STRATEGY_RESPONSE: &str = "riparo_strategy_response_total";
pub(crate) const METRIC_FALLBACK: &str = "riparo_fallback_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    Fallback,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Cache => "cache",
            Self::Fallback => "fallback",
        }
    }
}

/// Answer to an intercepted request.
#[derive(Debug, Clone)]
pub enum Outcome {
    Respond {
        response: CachedResponse,
        source: ResponseSource,
    },
    /// Network and cache both failed and the offline page is missing.
    Unavailable,
}

impl Outcome {
    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            Self::Respond { source, .. } => Some(*source),
            Self::Unavailable => None,
        }
    }

    pub fn response(&self) -> Option<&CachedResponse> {
        match self {
            Self::Respond { response, .. } => Some(response),
            Self::Unavailable => None,
        }
    }
}

/// Why a strategy could not answer from its first choice.
#[derive(Debug, Error)]
enum StrategyFailure {
    #[error(transparent)]
    Network(#[from] TransportError),
    #[error("network answered with status {0}")]
    Status(StatusCode),
    #[error("cache store failed: {0}")]
    Store(#[from] StoreError),
    #[error("no cached copy")]
    NotFound,
}

impl StrategyFailure {
    fn class(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Status(_) => "status",
            Self::Store(_) => "store",
            Self::NotFound => "not_found",
        }
    }
}

#[derive(Clone, Copy)]
enum Strategy {
    NetworkFirst,
    CacheFirst,
}

impl Strategy {
    fn as_str(self) -> &'static str {
        match self {
            Self::NetworkFirst => "network_first",
            Self::CacheFirst => "cache_first",
        }
    }
}

#[derive(Clone)]
pub struct StrategyExecutor {
    handle: NamespaceHandle,
    transport: Arc<dyn Transport>,
    fallback: FallbackResolver,
}

impl StrategyExecutor {
    pub fn new(
        handle: NamespaceHandle,
        transport: Arc<dyn Transport>,
        fallback: FallbackResolver,
    ) -> Self {
        Self {
            handle,
            transport,
            fallback,
        }
    }

    /// Documents: live network response whenever one arrives, whatever its
    /// status; shareable 2xx copies are stored in the background. Only a
    /// transport failure falls back to the cache and then the offline page.
    #[instrument(skip_all, fields(url = %request.url, strategy = "network_first"))]
    pub async fn network_first(
        &self,
        request: &InterceptedRequest,
        completion: &Completion,
    ) -> Outcome {
        let failure = match self.transport.fetch(request).await {
            Ok(response) => {
                self.store_in_background(request, &response, completion);
                return respond(Strategy::NetworkFirst, response, ResponseSource::Network);
            }
            Err(err) => StrategyFailure::Network(err),
        };

        self.recover(Strategy::NetworkFirst, request, failure).await
    }

    /// Assets: a cached copy short-circuits the network entirely. A miss goes
    /// to the network; only a 2xx is returned, and only a shareable one is
    /// stored.
    #[instrument(skip_all, fields(url = %request.url, strategy = "cache_first"))]
    pub async fn cache_first(
        &self,
        request: &InterceptedRequest,
        completion: &Completion,
    ) -> Outcome {
        match self.handle.lookup(&request.key()).await {
            Ok(Some(cached)) => {
                return respond(Strategy::CacheFirst, cached, ResponseSource::Cache);
            }
            Ok(None) => debug!("cache miss"),
            Err(err) => {
                let failure = StrategyFailure::Store(err);
                warn!(
                    failure = failure.class(),
                    error = %failure,
                    "cache lookup failed, treating as miss"
                );
            }
        }

        let failure = match self.transport.fetch(request).await {
            Ok(response) if response.is_success() => {
                self.store_in_background(request, &response, completion);
                return respond(Strategy::CacheFirst, response, ResponseSource::Network);
            }
            Ok(response) => StrategyFailure::Status(response.status),
            Err(err) => StrategyFailure::Network(err),
        };

        self.recover(Strategy::CacheFirst, request, failure).await
    }

    async fn recover(
        &self,
        strategy: Strategy,
        request: &InterceptedRequest,
        failure: StrategyFailure,
    ) -> Outcome {
        debug!(
            strategy = strategy.as_str(),
            failure = failure.class(),
            error = %failure,
            "recovering from strategy failure"
        );

        let kind = match strategy {
            Strategy::CacheFirst => FallbackKind::Asset,
            Strategy::NetworkFirst => {
                let failure = match self.handle.lookup(&request.key()).await {
                    Ok(Some(cached)) => {
                        return respond(strategy, cached, ResponseSource::Cache);
                    }
                    Ok(None) => StrategyFailure::NotFound,
                    Err(err) => StrategyFailure::Store(err),
                };
                debug!(failure = failure.class(), error = %failure, "no cached document");
                FallbackKind::Document
            }
        };

        counter!(METRIC_FALLBACK, "kind" => kind.as_str()).increment(1);
        match self.fallback.resolve(kind).await {
            Some(response) => respond(strategy, response, ResponseSource::Fallback),
            None => Outcome::Unavailable,
        }
    }

    /// Store a copy without holding up the response. Responses meant for one
    /// client are skipped; failures are logged only.
    fn store_in_background(
        &self,
        request: &InterceptedRequest,
        response: &CachedResponse,
        completion: &Completion,
    ) {
        if !response.is_shareable() {
            debug!(url = %request.url, status = %response.status, "response not stored");
            return;
        }

        let handle = self.handle.clone();
        let key = request.key();
        let copy = response.clone();
        completion.wait_until(async move {
            if let Err(err) = handle.put(key.clone(), copy).await {
                warn!(url = %key, error = %err, "failed to store response copy");
            }
        });
    }
}

fn respond(strategy: Strategy, response: CachedResponse, source: ResponseSource) -> Outcome {
    counter!(
        METRIC_STRATEGY_RESPONSE,
        "strategy" => strategy.as_str(),
        "source" => source.as_str()
    )
    .increment(1);
    Outcome::Respond { response, source }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, header};

    use crate::cache::CacheStorage;
    use crate::domain::RequestKey;
    use crate::worker::testing::{FaultyStorage, StubTransport, origin};

    use super::*;

    struct Fixture {
        executor: StrategyExecutor,
        handle: NamespaceHandle,
        storage: Arc<FaultyStorage>,
        transport: Arc<StubTransport>,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(FaultyStorage::new());
        let shared: Arc<dyn CacheStorage> = storage.clone();
        let handle = NamespaceHandle::new(shared, "riparo-g1".into());
        let transport = Arc::new(StubTransport::new());
        let offline = RequestKey::resolve(&origin(), "/offline.html").expect("key");
        let fallback = FallbackResolver::new(handle.clone(), offline);
        Fixture {
            executor: StrategyExecutor::new(handle.clone(), transport.clone(), fallback),
            handle,
            storage,
            transport,
        }
    }

    fn request(path: &str) -> InterceptedRequest {
        InterceptedRequest::get(origin().join(path).expect("url"))
    }

    fn html(body: &'static str) -> CachedResponse {
        CachedResponse::with_body(StatusCode::OK, "text/html", body)
    }

    async fn seed(handle: &NamespaceHandle, path: &str, body: &'static str) {
        handle
            .put(request(path).key(), html(body))
            .await
            .expect("seed");
    }

    fn body_of(outcome: &Outcome) -> String {
        let response = outcome.response().expect("response");
        String::from_utf8(response.body.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn network_first_returns_live_page_and_keeps_copy() {
        let fx = fixture();
        fx.transport.serve("/posts/x", "live");
        let completion = Completion::new();

        let outcome = fx
            .executor
            .network_first(&request("/posts/x"), &completion)
            .await;
        assert_eq!(outcome.source(), Some(ResponseSource::Network));
        assert_eq!(body_of(&outcome), "live");

        completion.settled().await;
        fx.transport.go_offline();

        let completion = Completion::new();
        let offline = fx
            .executor
            .network_first(&request("/posts/x"), &completion)
            .await;
        assert_eq!(offline.source(), Some(ResponseSource::Cache));
        assert_eq!(body_of(&offline), "live");
    }

    #[tokio::test]
    async fn network_first_ignores_stale_cache_when_online() {
        let fx = fixture();
        seed(&fx.handle, "/about", "stale").await;
        fx.transport.serve("/about", "fresh");

        let outcome = fx
            .executor
            .network_first(&request("/about"), &Completion::new())
            .await;
        assert_eq!(body_of(&outcome), "fresh");
        assert_eq!(fx.transport.calls("/about"), 1);
    }

    #[tokio::test]
    async fn network_first_passes_error_pages_through_without_storing() {
        let fx = fixture();
        fx.transport.serve_status("/missing", StatusCode::NOT_FOUND);
        let completion = Completion::new();

        let outcome = fx
            .executor
            .network_first(&request("/missing"), &completion)
            .await;
        let response = outcome.response().expect("response");
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(outcome.source(), Some(ResponseSource::Network));

        assert_eq!(completion.settled().await, 0);
        let stored = fx.handle.lookup(&request("/missing").key()).await;
        assert!(stored.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn network_first_falls_back_to_offline_page() {
        let fx = fixture();
        seed(&fx.handle, "/offline.html", "offline").await;
        fx.transport.go_offline();

        let outcome = fx
            .executor
            .network_first(&request("/post/x"), &Completion::new())
            .await;
        assert_eq!(outcome.source(), Some(ResponseSource::Fallback));
        assert_eq!(body_of(&outcome), "offline");
    }

    #[tokio::test]
    async fn network_first_without_offline_page_is_unavailable() {
        let fx = fixture();
        fx.transport.go_offline();

        let outcome = fx
            .executor
            .network_first(&request("/post/x"), &Completion::new())
            .await;
        assert!(matches!(outcome, Outcome::Unavailable));
    }

    #[tokio::test]
    async fn cache_first_hit_skips_network() {
        let fx = fixture();
        seed(&fx.handle, "/css/light.css", "cached").await;
        fx.transport.serve("/css/light.css", "network");

        let outcome = fx
            .executor
            .cache_first(&request("/css/light.css"), &Completion::new())
            .await;
        assert_eq!(outcome.source(), Some(ResponseSource::Cache));
        assert_eq!(body_of(&outcome), "cached");
        assert_eq!(fx.transport.calls("/css/light.css"), 0);
    }

    #[tokio::test]
    async fn cache_first_miss_fetches_and_stores() {
        let fx = fixture();
        fx.transport.serve("/js/theme-mode.js", "js");
        let completion = Completion::new();

        let outcome = fx
            .executor
            .cache_first(&request("/js/theme-mode.js"), &completion)
            .await;
        assert_eq!(outcome.source(), Some(ResponseSource::Network));
        completion.settled().await;

        let again = fx
            .executor
            .cache_first(&request("/js/theme-mode.js"), &Completion::new())
            .await;
        assert_eq!(again.source(), Some(ResponseSource::Cache));
        assert_eq!(fx.transport.calls("/js/theme-mode.js"), 1);
    }

    #[tokio::test]
    async fn cache_first_offline_miss_is_empty_not_found() {
        let fx = fixture();
        fx.transport.go_offline();

        let outcome = fx
            .executor
            .cache_first(&request("/images/missing.png"), &Completion::new())
            .await;
        let response = outcome.response().expect("response");
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(response.body.is_empty());
        assert_eq!(outcome.source(), Some(ResponseSource::Fallback));
    }

    #[tokio::test]
    async fn cache_first_error_status_is_not_found_and_not_stored() {
        let fx = fixture();
        fx.transport
            .serve_status("/css/broken.css", StatusCode::INTERNAL_SERVER_ERROR);
        let completion = Completion::new();

        let outcome = fx
            .executor
            .cache_first(&request("/css/broken.css"), &completion)
            .await;
        let response = outcome.response().expect("response");
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(completion.settled().await, 0);
    }

    #[tokio::test]
    async fn per_user_responses_are_served_but_not_stored() {
        let fx = fixture();
        let mut with_cookie = html("welcome back");
        with_cookie
            .headers
            .insert(header::SET_COOKIE, HeaderValue::from_static("session=abc"));
        fx.transport.respond("/account", with_cookie);
        let mut private = CachedResponse::with_body(StatusCode::OK, "text/css", "body{}");
        private
            .headers
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("private"));
        fx.transport.respond("/css/user.css", private);

        let completion = Completion::new();
        let page = fx
            .executor
            .network_first(&request("/account"), &completion)
            .await;
        assert_eq!(page.source(), Some(ResponseSource::Network));
        let asset = fx
            .executor
            .cache_first(&request("/css/user.css"), &completion)
            .await;
        assert_eq!(asset.source(), Some(ResponseSource::Network));
        assert_eq!(completion.settled().await, 0);

        for path in ["/account", "/css/user.css"] {
            let stored = fx.handle.lookup(&request(path).key()).await;
            assert!(stored.expect("lookup").is_none(), "{path}");
        }
    }

    #[tokio::test]
    async fn cache_first_read_error_counts_as_miss() {
        let fx = fixture();
        seed(&fx.handle, "/css/light.css", "cached").await;
        fx.storage.refuse_read(request("/css/light.css").key());
        fx.transport.serve("/css/light.css", "network");

        let outcome = fx
            .executor
            .cache_first(&request("/css/light.css"), &Completion::new())
            .await;
        assert_eq!(outcome.source(), Some(ResponseSource::Network));
        assert_eq!(body_of(&outcome), "network");
        assert_eq!(fx.transport.calls("/css/light.css"), 1);
    }

    #[tokio::test]
    async fn network_first_unreadable_copy_falls_back_to_offline_page() {
        let fx = fixture();
        seed(&fx.handle, "/about", "about").await;
        seed(&fx.handle, "/offline.html", "offline").await;
        fx.storage.refuse_read(request("/about").key());
        fx.transport.go_offline();

        let outcome = fx
            .executor
            .network_first(&request("/about"), &Completion::new())
            .await;
        assert_eq!(outcome.source(), Some(ResponseSource::Fallback));
        assert_eq!(body_of(&outcome), "offline");
    }

    #[tokio::test]
    async fn unreadable_offline_page_is_unavailable() {
        let fx = fixture();
        seed(&fx.handle, "/offline.html", "offline").await;
        fx.storage.refuse_read(request("/offline.html").key());
        fx.transport.go_offline();

        let outcome = fx
            .executor
            .network_first(&request("/post/x"), &Completion::new())
            .await;
        assert!(matches!(outcome, Outcome::Unavailable));
    }
}
