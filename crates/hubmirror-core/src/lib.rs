//! Caching mirror for a remote artifact repository.
//!
//! This crate implements the cache-aside core of the mirror:
//!
//! - Request path validation and cache key derivation
//! - On-disk cache store with atomic, streaming writes
//! - Upstream client with bearer-token auth
//! - Single-flight coordination of concurrent misses
//! - Dispatch of GET/HEAD requests onto the above
//!
//! # Quick Start
//!
//! ```no_run
//! use hubmirror_core::{Dispatcher, MirrorConfig, RequestMethod};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = MirrorConfig::from_env().with_cache_dir("/var/cache/hubmirror");
//! let dispatcher = Dispatcher::from_config(&config).await?;
//!
//! let response = dispatcher
//!     .dispatch(RequestMethod::Get, "org/model/resolve/main/config.json")
//!     .await?;
//! println!("{} ({})", response.status, response.cache);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `CACHE_DIR` | Cache root (default: `/cache`) |
//! | `HUGGINGFACE_API_TOKEN` | Bearer token sent upstream |
//! | `HUBMIRROR_UPSTREAM_URL` | Upstream base URL (default: `https://huggingface.co`) |
//! | `HUBMIRROR_TIMEOUT` | Upstream read timeout in seconds (default: 300) |
//! | `HUBMIRROR_CONNECT_TIMEOUT` | Upstream connect timeout in seconds (default: 10) |
//! | `HUBMIRROR_CANCEL_ORPHANED` | Abort fetches nobody waits for (default: true) |

pub mod auth;
pub mod cache;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod key;
pub mod types;
pub mod upstream;

// Re-export main types
pub use auth::TokenProvider;
pub use cache::{CacheEntry, CacheMeta, CacheStore, CachedFile, WriteMeta};
pub use coordinator::{FetchCoordinator, Fetched};
pub use dispatcher::{CacheStatus, Dispatcher, MirrorResponse, RequestMethod};
pub use error::{MirrorError, MirrorResult};
pub use key::{CacheKey, RESERVED_DIR};
pub use types::{ByteStream, CancelPolicy, MirrorConfig, UpstreamHeaders, DEFAULT_CONTENT_TYPE};
pub use upstream::{Fetch, UpstreamClient, UpstreamResponse, MIRROR_USER_AGENT};
