//! Reverse-proxy front end.
//!
//! Every incoming request becomes a request event. An answered event is
//! served from its outcome; an unanswered one is forwarded to the network
//! unchanged. Targets outside the public origin are refused before any of
//! this happens.

use std::{sync::Arc, time::Instant};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, Uri, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

use crate::application::bootstrap::Runtime;
use crate::application::error::{ErrorReport, HttpError};
use crate::application::transport::Transport;
use crate::domain::{CachedResponse, Destination, InterceptedRequest};
use crate::worker::{EventDispatcher, LifecycleEvent, Outcome, RequestEvent};

/// Manual cutover trigger, mounted only when cutover is not automatic.
pub const CUTOVER_PATH: &str = "/.riparo/cutover";
const SOURCE_HEADER: &str = "x-riparo-source";
const FETCH_DEST_HEADER: &str = "sec-fetch-dest";

#[derive(Clone)]
pub struct ProxyState {
    pub runtime: Arc<Runtime>,
    pub public_url: Url,
    /// Request bodies beyond this many bytes are refused with 413.
    pub body_limit: usize,
}

impl ProxyState {
    fn dispatcher(&self) -> &Arc<EventDispatcher> {
        self.runtime.dispatcher()
    }

    fn transport(&self) -> &Arc<dyn Transport> {
        self.runtime.transport()
    }
}

pub fn build_router(state: ProxyState, manual_cutover: bool) -> Router {
    let router = if manual_cutover {
        Router::new().route(CUTOVER_PATH, post(trigger_cutover))
    } else {
        Router::new()
    };

    router
        .fallback(proxy)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
        .with_state(state)
}

async fn proxy(State(state): State<ProxyState>, request: Request<Body>) -> Response {
    let intercepted =
        match intercepted_request(&state.public_url, state.body_limit, request).await {
            Ok(intercepted) => intercepted,
            Err(err) => {
                debug!(status = %err.status(), "request refused before dispatch");
                return err.into_response();
            }
        };

    let event = LifecycleEvent::Request(RequestEvent::new(intercepted.clone()));
    let dispatched = state.dispatcher().dispatch(event).await;

    // Deferred writes keep running on their own tasks once `dispatched` drops.
    match dispatched.take_outcome() {
        Some(Outcome::Respond { response, source }) => {
            let mut response = into_http_response(response);
            response
                .headers_mut()
                .insert(SOURCE_HEADER, HeaderValue::from_static(source.as_str()));
            response
        }
        Some(Outcome::Unavailable) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_message(
                "infra::http::proxy",
                StatusCode::SERVICE_UNAVAILABLE,
                "offline page missing from cache",
            )
            .attach(&mut response);
            response
        }
        None => passthrough(state.transport().as_ref(), &intercepted).await,
    }
}

async fn passthrough(transport: &dyn Transport, request: &InterceptedRequest) -> Response {
    match transport.fetch(request).await {
        Ok(response) => into_http_response(response),
        Err(err) => HttpError::from_error(
            "infra::http::passthrough",
            StatusCode::BAD_GATEWAY,
            "Upstream unreachable",
            &err,
        )
        .into_response(),
    }
}

async fn trigger_cutover(State(state): State<ProxyState>) -> Response {
    match state.runtime.cutover().await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => HttpError::from_error(
            "infra::http::trigger_cutover",
            StatusCode::CONFLICT,
            "Cutover not possible",
            &err,
        )
        .into_response(),
    }
}

async fn intercepted_request(
    public_url: &Url,
    body_limit: usize,
    request: Request<Body>,
) -> Result<InterceptedRequest, HttpError> {
    let (parts, body) = request.into_parts();
    let url = request_url(public_url, &parts)?;
    if url.origin() != public_url.origin() {
        return Err(HttpError::new(
            "infra::http::intercepted_request",
            StatusCode::MISDIRECTED_REQUEST,
            "Request target is not served here",
            format!("`{}` is outside `{}`", url, public_url.origin().ascii_serialization()),
        ));
    }
    let destination = Destination::from_fetch_dest(
        parts
            .headers
            .get(FETCH_DEST_HEADER)
            .and_then(|value| value.to_str().ok()),
    );

    let body = Limited::new(body, body_limit)
        .collect()
        .await
        .map_err(|err| {
            if err.is::<LengthLimitError>() {
                HttpError::new(
                    "infra::http::intercepted_request",
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Request body too large",
                    format!("body exceeds {body_limit} bytes"),
                )
            } else {
                HttpError::new(
                    "infra::http::intercepted_request",
                    StatusCode::BAD_REQUEST,
                    "Request body could not be read",
                    err.to_string(),
                )
            }
        })?
        .to_bytes();

    Ok(InterceptedRequest::get(url)
        .with_method(parts.method)
        .with_destination(destination)
        .with_headers(parts.headers)
        .with_body(body))
}

/// Absolute-form targets are kept as is; origin-form ones are resolved
/// against the public origin.
fn request_url(public_url: &Url, parts: &Parts) -> Result<Url, HttpError> {
    let uri: &Uri = &parts.uri;
    let parsed = if uri.scheme().is_some() {
        Url::parse(&uri.to_string())
    } else {
        let target = uri.path_and_query().map_or("/", |value| value.as_str());
        public_url.join(target)
    };

    parsed.map_err(|err| {
        HttpError::new(
            "infra::http::request_url",
            StatusCode::BAD_REQUEST,
            "Invalid request target",
            format!("`{uri}`: {err}"),
        )
    })
}

fn into_http_response(cached: CachedResponse) -> Response {
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = cached.status;
    *response.headers_mut() = cached.headers;
    response
}

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: Uuid::new_v4().to_string(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let Some(report) = response.extensions_mut().remove::<ErrorReport>() else {
        return response;
    };

    let elapsed_ms = start.elapsed().as_millis();
    let detail = report
        .messages
        .first()
        .cloned()
        .unwrap_or_else(|| "no diagnostic available".to_string());

    if report.status.is_server_error() {
        error!(
            target = "riparo::http::response",
            status = report.status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms = elapsed_ms,
            source = report.source,
            detail = %detail,
            chain = ?report.messages,
            request_id = request_id,
            "request failed",
        );
    } else {
        warn!(
            target = "riparo::http::response",
            status = report.status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms = elapsed_ms,
            source = report.source,
            detail = %detail,
            request_id = request_id,
            "client request error",
        );
    }

    response
}
