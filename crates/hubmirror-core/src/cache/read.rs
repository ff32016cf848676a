//! Read path: existence, entry description, open.

use std::io::ErrorKind;

use tokio::fs::{self, File};
use tracing::{debug, warn};

use crate::error::{MirrorError, MirrorResult};
use crate::key::CacheKey;
use crate::types::DEFAULT_CONTENT_TYPE;

use super::{keys, CacheEntry, CacheMeta, CachedFile, CacheStore};

pub(crate) async fn exists_impl(store: &CacheStore, key: &CacheKey) -> bool {
    fs::metadata(keys::content_path_impl(&store.cache_dir, key))
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Missing or corrupt sidecars degrade to `None`; they never fail a read.
pub(crate) async fn read_meta_impl(store: &CacheStore, key: &CacheKey) -> Option<CacheMeta> {
    let meta_path = keys::meta_path_impl(&store.cache_dir, key);

    let content = match fs::read(&meta_path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(key = %key, error = %e, "failed to read cache metadata");
            return None;
        }
    };

    match serde_json::from_slice(&content) {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!(key = %key, error = %e, "corrupt cache metadata, using defaults");
            None
        }
    }
}

fn describe(key: &CacheKey, store: &CacheStore, size: u64, meta: Option<CacheMeta>) -> CacheEntry {
    let (content_type, fetched_at) = match meta {
        Some(meta) => (meta.content_type, Some(meta.fetched_at)),
        None => (DEFAULT_CONTENT_TYPE.to_string(), None),
    };

    CacheEntry {
        key: key.clone(),
        path: keys::content_path_impl(&store.cache_dir, key),
        content_type,
        size,
        fetched_at,
    }
}

pub(crate) async fn entry_impl(
    store: &CacheStore,
    key: &CacheKey,
) -> MirrorResult<Option<CacheEntry>> {
    let path = keys::content_path_impl(&store.cache_dir, key);

    let metadata = match fs::metadata(&path).await {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::NotADirectory => {
            return Ok(None)
        }
        Err(e) => {
            return Err(MirrorError::Cache {
                message: format!("failed to stat cache entry: {}", e),
            })
        }
    };

    let meta = read_meta_impl(store, key).await;
    Ok(Some(describe(key, store, metadata.len(), meta)))
}

pub(crate) async fn open_impl(store: &CacheStore, key: &CacheKey) -> MirrorResult<CachedFile> {
    let path = keys::content_path_impl(&store.cache_dir, key);
    let not_found = || MirrorError::NotFound {
        key: key.to_string(),
    };

    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::NotADirectory => {
            debug!(key = %key, "not in cache");
            return Err(not_found());
        }
        Err(e) => {
            return Err(MirrorError::Cache {
                message: format!("failed to open cache entry: {}", e),
            })
        }
    };

    // Size comes from the open handle so it matches what is streamed even if
    // the entry is replaced concurrently.
    let metadata = file.metadata().await.map_err(|e| MirrorError::Cache {
        message: format!("failed to stat cache entry: {}", e),
    })?;
    if !metadata.is_file() {
        return Err(not_found());
    }

    let meta = read_meta_impl(store, key).await;
    Ok(CachedFile {
        entry: describe(key, store, metadata.len(), meta),
        file,
    })
}
