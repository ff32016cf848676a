//! HTTP surface.
//!
//! | Route | Behavior |
//! |-------|----------|
//! | `GET/HEAD /` | liveness, no cache interaction |
//! | `GET /api/{path}` | streaming passthrough, no caching |
//! | `GET /{path}` | cache-aside mirror |
//! | `HEAD /{path}` | existence probe, never writes |

use std::future::Future;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Path, RawQuery, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use hubmirror_core::{
    Dispatcher, MirrorError, MirrorResponse, RequestMethod, UpstreamClient, DEFAULT_CONTENT_TYPE,
};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Response header reporting how a mirror response was produced.
pub const X_CACHE: &str = "x-cache";

/// First segment of the passthrough namespace.
const API_NAMESPACE: &str = "api";

/// Headers that describe a single connection and are not forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn upstream(&self) -> &UpstreamClient {
        self.dispatcher.coordinator().fetcher()
    }
}

/// Error response wrapper.
pub struct ApiError(MirrorError);

impl From<MirrorError> for ApiError {
    fn from(err: MirrorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/*path", get(mirror_get).head(mirror_head))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    let cache = response
        .headers()
        .get(X_CACHE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    info!(
        %method,
        path = %uri,
        status = response.status().as_u16(),
        cache = %cache,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

async fn liveness() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn mirror_get(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    if let Some(inner) = api_path(&path) {
        return passthrough(&state, inner, query.as_deref()).await;
    }

    let response = state
        .dispatcher
        .dispatch(RequestMethod::Get, &path)
        .await?;
    Ok(mirror_response(response))
}

async fn mirror_head(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let response = state
        .dispatcher
        .dispatch(RequestMethod::Head, &path)
        .await?;
    Ok(mirror_response(response))
}

/// Path inside the passthrough namespace, if `path` is in it.
fn api_path(path: &str) -> Option<&str> {
    match path.strip_prefix(API_NAMESPACE)? {
        "" => Some(""),
        rest => rest.strip_prefix('/'),
    }
}

fn mirror_response(response: MirrorResponse) -> Response {
    let MirrorResponse {
        status,
        cache,
        entry,
        body,
    } = response;

    let body = match body {
        Some(file) => Body::from_stream(file.into_stream()),
        None => Body::empty(),
    };

    let mut out = Response::new(body);
    *out.status_mut() = status;

    let headers = out.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(cache.as_str()));
    if let Some(entry) = entry {
        let content_type = HeaderValue::from_str(&entry.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        headers.insert(header::CONTENT_TYPE, content_type);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(entry.size));
    }

    out
}

async fn passthrough(
    state: &AppState,
    path: &str,
    query: Option<&str>,
) -> Result<Response, ApiError> {
    let upstream = state.upstream().passthrough(path, query).await.map_err(|e| {
        warn!(path, error = %e, "passthrough failed");
        e
    })?;

    let mut out = Response::new(Body::from_stream(upstream.body));
    *out.status_mut() = upstream.status;
    copy_end_to_end(&upstream.headers, out.headers_mut());
    Ok(out)
}

fn copy_end_to_end(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if !is_hop_by_hop(name) {
            to.append(name.clone(), value.clone());
        }
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}
