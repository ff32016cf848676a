//! Upstream fetcher.
//!
//! Issues GET/HEAD against `{upstream_url}/{key}`. A non-200 status is not an
//! error here: it comes back in [`UpstreamResponse::status`] for the caller
//! to interpret. Only network-level failures surface as
//! [`MirrorError::UpstreamUnavailable`].

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode};
use tracing::debug;
use url::Url;

use crate::auth::TokenProvider;
use crate::error::{MirrorError, MirrorResult};
use crate::key::CacheKey;
use crate::types::{ByteStream, MirrorConfig, UpstreamHeaders};

mod http;

use http::HttpBackend;

/// User agent sent on every upstream request.
pub const MIRROR_USER_AGENT: &str = concat!("hubmirror/", env!("CARGO_PKG_VERSION"));

/// Namespace served by the passthrough.
const API_PREFIX: &str = "api";

/// Status, headers and a lazily streamed body.
pub struct UpstreamResponse {
    /// Response status.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Final URL after redirects.
    pub url: String,

    /// Body, pulled chunk by chunk.
    pub body: ByteStream,
}

impl UpstreamResponse {
    /// Headers of interest for caching.
    pub fn summary(&self) -> UpstreamHeaders {
        UpstreamHeaders::from_headers(&self.headers)
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Source of upstream content.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    /// GET the resource for `key`, body unread.
    async fn get(&self, key: &CacheKey) -> MirrorResult<UpstreamResponse>;

    /// HEAD the resource for `key`.
    async fn head(&self, key: &CacheKey) -> MirrorResult<StatusCode>;

    /// URL the resource for `key` is fetched from.
    fn url_for(&self, key: &CacheKey) -> String;
}

/// Upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: HttpBackend,
    base_url: Url,
}

impl UpstreamClient {
    pub fn new(config: &MirrorConfig) -> MirrorResult<Self> {
        let token_provider = TokenProvider::from_option(config.token.as_deref());
        Self::with_token_provider(config, token_provider)
    }

    pub fn with_token_provider(
        config: &MirrorConfig,
        token_provider: TokenProvider,
    ) -> MirrorResult<Self> {
        let base_url = Url::parse(&config.upstream_url).map_err(|e| MirrorError::Config {
            message: format!("invalid upstream URL {:?}: {}", config.upstream_url, e),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(MirrorError::Config {
                message: format!("upstream URL {:?} cannot be a base", config.upstream_url),
            });
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(MIRROR_USER_AGENT));

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| MirrorError::Config {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http: HttpBackend {
                client,
                token_provider,
            },
            base_url,
        })
    }

    /// Stream an `api/` request straight through, without caching.
    ///
    /// `path` is relative to the `api/` namespace; `query` is forwarded as is.
    pub async fn passthrough(&self, path: &str, query: Option<&str>) -> MirrorResult<UpstreamResponse> {
        if path.split('/').any(|s| s == "." || s == "..") {
            return Err(MirrorError::NotFoundPath {
                path: path.to_string(),
                reason: "traversal segment".to_string(),
            });
        }

        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(API_PREFIX)
                .extend(path.split('/').filter(|s| !s.is_empty()));
        }
        url.set_query(query.filter(|q| !q.is_empty()));

        debug!(url = %url, "passthrough request");
        let response = self.http.request(Method::GET, url.as_str()).await?;
        Ok(into_upstream_response(response))
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn is_authenticated(&self) -> bool {
        self.http.token_provider.is_authenticated()
    }
}

fn into_upstream_response(response: reqwest::Response) -> UpstreamResponse {
    UpstreamResponse {
        status: response.status(),
        headers: response.headers().clone(),
        url: response.url().to_string(),
        body: response.bytes_stream().map_err(MirrorError::from).boxed(),
    }
}

#[async_trait]
impl Fetch for UpstreamClient {
    async fn get(&self, key: &CacheKey) -> MirrorResult<UpstreamResponse> {
        let url = self.url_for(key);
        debug!(url = %url, "fetching upstream content");

        let response = self.http.request(Method::GET, &url).await?;
        Ok(into_upstream_response(response))
    }

    async fn head(&self, key: &CacheKey) -> MirrorResult<StatusCode> {
        let url = self.url_for(key);
        debug!(url = %url, "probing upstream");

        let response = self.http.request(Method::HEAD, &url).await?;
        Ok(response.status())
    }

    fn url_for(&self, key: &CacheKey) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(key.segments());
        }
        url.to_string()
    }
}
