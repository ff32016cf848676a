//! Request dispatch.
//!
//! Turns a request path into a cache key and serves it:
//!
//! 1. Validate the path (malformed → 404, nothing else touched)
//! 2. Cache hit → stream the stored entry
//! 3. GET miss → coordinated fetch, then stream the new entry
//! 4. HEAD miss → upstream probe, no cache mutation

use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;
use tracing::debug;

use crate::cache::{CacheEntry, CacheStore, CachedFile};
use crate::coordinator::{FetchCoordinator, Fetched};
use crate::error::{MirrorError, MirrorResult};
use crate::key::CacheKey;
use crate::types::MirrorConfig;
use crate::upstream::{Fetch, UpstreamClient};

/// Methods the mirror serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Head,
}

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from disk.
    Hit,

    /// Fetched from upstream by this request (or probed, for HEAD).
    Miss,

    /// Served from a fetch started by a concurrent request.
    Joined,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Joined => "JOINED",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a dispatched request.
#[derive(Debug)]
pub struct MirrorResponse {
    /// Status to answer with.
    pub status: StatusCode,

    /// How the response was produced.
    pub cache: CacheStatus,

    /// Entry served, when the content is cached.
    pub entry: Option<CacheEntry>,

    /// Open content for GET; always `None` for HEAD.
    pub body: Option<CachedFile>,
}

/// Request dispatcher.
pub struct Dispatcher<F: Fetch = UpstreamClient> {
    coordinator: FetchCoordinator<F>,
}

impl<F: Fetch> Clone for Dispatcher<F> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl Dispatcher<UpstreamClient> {
    /// Build the store, upstream client and coordinator from `config`.
    pub async fn from_config(config: &MirrorConfig) -> MirrorResult<Self> {
        let store = CacheStore::open_root(&config.cache_dir).await?;
        let fetcher = Arc::new(UpstreamClient::new(config)?);
        Ok(Self::new(FetchCoordinator::new(
            fetcher,
            store,
            config.cancel_policy,
        )))
    }
}

impl<F: Fetch> Dispatcher<F> {
    pub fn new(coordinator: FetchCoordinator<F>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &FetchCoordinator<F> {
        &self.coordinator
    }

    pub fn store(&self) -> &CacheStore {
        self.coordinator.store()
    }

    /// Serve `path` with `method`.
    pub async fn dispatch(&self, method: RequestMethod, path: &str) -> MirrorResult<MirrorResponse> {
        let key = match CacheKey::parse(path) {
            Ok(key) => key,
            Err(e) => {
                debug!(path, error = %e, "rejected request path");
                return Err(e);
            }
        };

        match method {
            RequestMethod::Get => self.get(&key).await,
            RequestMethod::Head => self.head(&key).await,
        }
    }

    async fn get(&self, key: &CacheKey) -> MirrorResult<MirrorResponse> {
        match self.store().open(key).await {
            Ok(file) => {
                debug!(key = %key, "cache hit");
                return Ok(hit(file));
            }
            Err(MirrorError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        debug!(key = %key, "cache miss");
        let fetched = self.coordinator.fetch_or_join(key).await?;
        let file = self.store().open(key).await?;

        Ok(MirrorResponse {
            status: StatusCode::OK,
            cache: fetched_status(&fetched),
            entry: Some(file.entry.clone()),
            body: Some(file),
        })
    }

    /// HEAD never goes through the coordinator and never writes.
    async fn head(&self, key: &CacheKey) -> MirrorResult<MirrorResponse> {
        if let Some(entry) = self.store().entry(key).await? {
            return Ok(MirrorResponse {
                status: StatusCode::OK,
                cache: CacheStatus::Hit,
                entry: Some(entry),
                body: None,
            });
        }

        let status = self.coordinator.fetcher().head(key).await?;
        debug!(key = %key, status = status.as_u16(), "upstream probe");

        Ok(MirrorResponse {
            status,
            cache: CacheStatus::Miss,
            entry: None,
            body: None,
        })
    }
}

/// An entry the fetch task found already on disk counts as a hit.
fn fetched_status(fetched: &Fetched) -> CacheStatus {
    if fetched.reused {
        CacheStatus::Hit
    } else if fetched.joined {
        CacheStatus::Joined
    } else {
        CacheStatus::Miss
    }
}

fn hit(file: CachedFile) -> MirrorResponse {
    MirrorResponse {
        status: StatusCode::OK,
        cache: CacheStatus::Hit,
        entry: Some(file.entry.clone()),
        body: Some(file),
    }
}
