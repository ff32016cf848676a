//! Configuration and shared wire types.

use std::path::PathBuf;

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::auth::TokenProvider;
use crate::error::MirrorResult;

/// Default content type when the upstream does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Chunked body flowing from the upstream into the cache.
pub type ByteStream = BoxStream<'static, MirrorResult<Bytes>>;

/// What happens to an in-flight fetch when every requester waiting on it
/// has disconnected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelPolicy {
    /// Abort the upstream transfer and discard the partial file.
    #[default]
    Abort,

    /// Let the transfer finish and populate the cache.
    Complete,
}

/// Mirror configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Root of the on-disk cache tree.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Upstream repository base URL.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    /// Bearer token for upstream requests.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Upstream read timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Upstream connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Policy for fetches whose requesters all went away.
    #[serde(default)]
    pub cancel_policy: CancelPolicy,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/cache")
}

fn default_upstream_url() -> String {
    "https://huggingface.co".to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            upstream_url: default_upstream_url(),
            token: None,
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            cancel_policy: CancelPolicy::default(),
        }
    }
}

impl MirrorConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `CACHE_DIR` | Cache root (default `/cache`) |
    /// | `HUGGINGFACE_API_TOKEN` | Upstream bearer token |
    /// | `HUBMIRROR_UPSTREAM_URL` | Upstream base URL |
    /// | `HUBMIRROR_TIMEOUT` | Read timeout in seconds (default 300) |
    /// | `HUBMIRROR_CONNECT_TIMEOUT` | Connect timeout in seconds (default 10) |
    /// | `HUBMIRROR_CANCEL_ORPHANED` | `0`/`false` lets orphaned fetches complete |
    pub fn from_env() -> Self {
        Self {
            cache_dir: std::env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_cache_dir()),
            upstream_url: std::env::var("HUBMIRROR_UPSTREAM_URL")
                .unwrap_or_else(|_| default_upstream_url()),
            token: TokenProvider::from_env().token().map(String::from),
            timeout_secs: std::env::var("HUBMIRROR_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout),
            connect_timeout_secs: std::env::var("HUBMIRROR_CONNECT_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_connect_timeout),
            cancel_policy: match std::env::var("HUBMIRROR_CANCEL_ORPHANED") {
                Ok(v) if v == "0" || v.eq_ignore_ascii_case("false") => CancelPolicy::Complete,
                _ => CancelPolicy::Abort,
            },
        }
    }

    /// Set the cache root.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Set the upstream base URL.
    pub fn with_upstream_url(mut self, url: impl Into<String>) -> Self {
        self.upstream_url = url.into();
        self
    }

    /// Set the token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the cancel policy.
    pub fn with_cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.cancel_policy = policy;
        self
    }
}

/// Headers of interest on an upstream response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamHeaders {
    /// Content-Type.
    pub content_type: Option<String>,

    /// Content-Length.
    pub content_length: Option<u64>,

    /// ETag.
    pub etag: Option<String>,
}

impl UpstreamHeaders {
    /// Parse headers from a response.
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        Self {
            content_type: headers
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            content_length: headers
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok()),
            etag: headers
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
        }
    }
}
