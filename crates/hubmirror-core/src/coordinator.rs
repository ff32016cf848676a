//! Single-flight fetch coordination.
//!
//! Per key: `Idle → Fetching → {Succeeded, Failed} → Idle`. The first miss
//! for a key spawns the fetch task and every concurrent miss for the same
//! key subscribes to its outcome, so at most one upstream request per key is
//! in flight. The task removes its map entry before the outcome is
//! delivered; a request arriving afterwards sees `Idle` and re-checks the
//! cache.
//!
//! Each waiter holds a [`Subscription`]. When the last one goes away before
//! the fetch finishes, [`CancelPolicy`] decides whether the task is aborted
//! or left to populate the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::StatusCode;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStore, WriteMeta};
use crate::error::{MirrorError, MirrorResult};
use crate::key::CacheKey;
use crate::types::CancelPolicy;
use crate::upstream::{Fetch, UpstreamClient};

type Outcome = MirrorResult<Stored>;
type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;

/// Result of a coordinated fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// The published entry.
    pub entry: CacheEntry,

    /// Whether this caller attached to a fetch started by another request.
    pub joined: bool,

    /// Whether the entry was already on disk when the fetch task started,
    /// so no upstream request was made.
    pub reused: bool,
}

#[derive(Debug, Clone)]
struct Stored {
    entry: CacheEntry,
    reused: bool,
}

struct InFlight {
    id: u64,
    outcome: SharedOutcome,
    subscribers: usize,
    abort: AbortHandle,
}

struct Inner<F> {
    fetcher: Arc<F>,
    store: CacheStore,
    policy: CancelPolicy,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    next_id: AtomicU64,
}

/// Deduplicates concurrent misses into one upstream fetch per key.
pub struct FetchCoordinator<F: Fetch = UpstreamClient> {
    inner: Arc<Inner<F>>,
}

impl<F: Fetch> Clone for FetchCoordinator<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: Fetch> FetchCoordinator<F> {
    pub fn new(fetcher: Arc<F>, store: CacheStore, policy: CancelPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                store,
                policy,
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn fetcher(&self) -> &Arc<F> {
        &self.inner.fetcher
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    pub fn policy(&self) -> CancelPolicy {
        self.inner.policy
    }

    /// Number of keys with a fetch in progress.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().len()
    }

    /// Fetch `key` from upstream into the cache, or wait for the fetch
    /// already running for it. Every caller of one fetch gets the same
    /// outcome.
    pub async fn fetch_or_join(&self, key: &CacheKey) -> MirrorResult<Fetched> {
        let (outcome, id, joined) = {
            let mut map = self.inner.lock();
            match map.get_mut(key) {
                Some(flight) => {
                    flight.subscribers += 1;
                    debug!(key = %key, subscribers = flight.subscribers, "joined in-flight fetch");
                    (flight.outcome.clone(), flight.id, true)
                }
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let (outcome, abort) = Inner::spawn_fetch(&self.inner, key.clone(), id);
                    map.insert(
                        key.clone(),
                        InFlight {
                            id,
                            outcome: outcome.clone(),
                            subscribers: 1,
                            abort,
                        },
                    );
                    (outcome, id, false)
                }
            }
        };

        let _subscription = Subscription {
            inner: &*self.inner,
            key,
            id,
        };

        outcome.await.map(|stored| Fetched {
            entry: stored.entry,
            joined,
            reused: stored.reused,
        })
    }
}

impl<F: Fetch> Inner<F> {
    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the entry for `key` if it still belongs to fetch `id`.
    fn finish(&self, key: &CacheKey, id: u64) {
        let mut map = self.lock();
        if map.get(key).is_some_and(|flight| flight.id == id) {
            map.remove(key);
        }
    }

    fn spawn_fetch(this: &Arc<Self>, key: CacheKey, id: u64) -> (SharedOutcome, AbortHandle) {
        let task_inner = Arc::clone(this);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let outcome = task_inner.fetch_and_store(&task_key).await;
            // Removed before delivery so the next request starts fresh.
            task_inner.finish(&task_key, id);
            outcome
        });
        let abort = handle.abort_handle();

        let inner = Arc::clone(this);
        let outcome = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if e.is_panic() {
                        warn!(key = %key, "fetch task panicked");
                    }
                    inner.finish(&key, id);
                    Err(MirrorError::Cancelled)
                }
            }
        }
        .boxed()
        .shared();

        (outcome, abort)
    }

    async fn fetch_and_store(&self, key: &CacheKey) -> Outcome {
        // A fetch that finished between the caller's miss and this task
        // starting has already published the entry.
        if let Some(entry) = self.store.entry(key).await? {
            debug!(key = %key, "populated while waiting, skipping upstream");
            return Ok(Stored {
                entry,
                reused: true,
            });
        }

        let started = Instant::now();
        let response = self.fetcher.get(key).await?;

        if response.status != StatusCode::OK {
            warn!(
                key = %key,
                status = response.status.as_u16(),
                "upstream refused fetch, nothing cached"
            );
            return Err(MirrorError::UpstreamStatus {
                status: response.status.as_u16(),
            });
        }

        let summary = response.summary();
        let meta = WriteMeta {
            content_type: summary.content_type,
            expected_length: summary.content_length,
            etag: summary.etag,
            upstream_url: Some(response.url.clone()),
        };

        match self.store.write_atomic(key, meta, response.body).await {
            Ok(entry) => {
                info!(
                    key = %key,
                    bytes = entry.size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "fetched from upstream"
                );
                Ok(Stored {
                    entry,
                    reused: false,
                })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "fetch failed, nothing cached");
                Err(e)
            }
        }
    }
}

/// A waiter on an in-flight fetch.
struct Subscription<'a, F: Fetch> {
    inner: &'a Inner<F>,
    key: &'a CacheKey,
    id: u64,
}

impl<F: Fetch> Drop for Subscription<'_, F> {
    fn drop(&mut self) {
        let mut map = self.inner.lock();
        let Some(flight) = map.get_mut(self.key) else {
            return;
        };
        if flight.id != self.id {
            return;
        }

        flight.subscribers = flight.subscribers.saturating_sub(1);
        if flight.subscribers > 0 {
            return;
        }

        match self.inner.policy {
            CancelPolicy::Abort => {
                flight.abort.abort();
                map.remove(self.key);
                debug!(key = %self.key, "all requesters gone, aborted fetch");
            }
            CancelPolicy::Complete => {
                debug!(key = %self.key, "all requesters gone, fetch continues");
            }
        }
    }
}
