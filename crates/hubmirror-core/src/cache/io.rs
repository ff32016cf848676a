//! Write path: temp file, fsync, rename.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{MirrorError, MirrorResult};
use crate::key::CacheKey;
use crate::types::DEFAULT_CONTENT_TYPE;

use super::{keys, CacheEntry, CacheMeta, CacheStore, WriteMeta};

/// Removes the temp file on drop unless the rename succeeded.
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.armed {
            // Also runs when the write future is cancelled, so no await here.
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "failed to discard temp file");
                }
            }
        }
    }
}

fn write_err(context: &str, e: std::io::Error) -> MirrorError {
    MirrorError::CacheWrite {
        message: format!("{}: {}", context, e),
    }
}

async fn create_parent(path: &Path) -> MirrorResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| write_err("failed to create cache directory", e))?;
    }
    Ok(())
}

pub(crate) async fn prepare_root_impl(store: &CacheStore) -> MirrorResult<()> {
    let tmp_dir = keys::tmp_dir_impl(&store.cache_dir);

    for dir in [
        store.cache_dir.clone(),
        tmp_dir.clone(),
        keys::meta_dir_impl(&store.cache_dir),
    ] {
        fs::create_dir_all(&dir).await.map_err(|e| MirrorError::Config {
            message: format!("failed to create {}: {}", dir.display(), e),
        })?;
    }

    let mut entries = fs::read_dir(&tmp_dir)
        .await
        .map_err(|e| MirrorError::Cache {
            message: format!("failed to read temp directory: {}", e),
        })?;

    let mut removed = 0usize;
    while let Some(entry) = entries.next_entry().await.map_err(|e| MirrorError::Cache {
        message: format!("failed to read directory entry: {}", e),
    })? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("part") {
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale temp file"),
            }
        }
    }

    if removed > 0 {
        debug!(removed, "removed stale temp files");
    }
    Ok(())
}

pub(crate) async fn write_atomic_impl<S>(
    store: &CacheStore,
    key: &CacheKey,
    meta: WriteMeta,
    mut body: S,
) -> MirrorResult<CacheEntry>
where
    S: Stream<Item = MirrorResult<Bytes>> + Unpin + Send,
{
    let final_path = keys::content_path_impl(&store.cache_dir, key);
    let mut temp = TempFile::new(keys::temp_path_impl(&store.cache_dir));

    create_parent(&temp.path).await?;
    let mut file = File::create(&temp.path)
        .await
        .map_err(|e| write_err("failed to create temp file", e))?;

    // One chunk is on disk before the next is pulled from the body.
    let mut written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| write_err("failed to write temp file", e))?;
        written += chunk.len() as u64;
    }

    if let Some(expected) = meta.expected_length {
        if expected != written {
            return Err(MirrorError::UpstreamUnavailable {
                message: format!(
                    "truncated body: expected {} bytes, received {}",
                    expected, written
                ),
            });
        }
    }

    file.flush()
        .await
        .map_err(|e| write_err("failed to flush temp file", e))?;
    file.sync_all()
        .await
        .map_err(|e| write_err("failed to sync temp file", e))?;
    drop(file);

    create_parent(&final_path).await?;

    let fetched_at = Utc::now();
    let content_type = meta
        .content_type
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    let sidecar = CacheMeta {
        content_type: content_type.clone(),
        content_length: written,
        fetched_at,
        etag: meta.etag,
        upstream_url: meta.upstream_url,
    };
    if let Err(e) = write_meta_impl(store, key, &sidecar).await {
        // Content is still committed; readers fall back to the default type.
        warn!(key = %key, error = %e, "failed to write cache metadata");
        discard_meta(store, key).await;
    }

    fs::rename(&temp.path, &final_path)
        .await
        .map_err(|e| write_err("failed to rename temp file", e))?;
    temp.disarm();

    debug!(key = %key, bytes = written, "cached entry");
    Ok(CacheEntry {
        key: key.clone(),
        path: final_path,
        content_type,
        size: written,
        fetched_at: Some(fetched_at),
    })
}

/// Sidecar goes in before the content rename; the rename is the commit.
async fn write_meta_impl(store: &CacheStore, key: &CacheKey, meta: &CacheMeta) -> MirrorResult<()> {
    let meta_path = keys::meta_path_impl(&store.cache_dir, key);

    let json = serde_json::to_vec_pretty(meta).map_err(|e| MirrorError::CacheWrite {
        message: format!("failed to serialize metadata: {}", e),
    })?;

    let temp_path = keys::temp_path_impl(&store.cache_dir);
    let mut file = File::create(&temp_path)
        .await
        .map_err(|e| write_err("failed to create metadata temp file", e))?;
    let mut temp = TempFile::new(temp_path);

    file.write_all(&json)
        .await
        .map_err(|e| write_err("failed to write metadata", e))?;
    file.flush()
        .await
        .map_err(|e| write_err("failed to flush metadata", e))?;
    drop(file);

    create_parent(&meta_path).await?;
    fs::rename(&temp.path, &meta_path)
        .await
        .map_err(|e| write_err("failed to rename metadata", e))?;
    temp.disarm();

    Ok(())
}

/// Drop a sidecar that may describe an older version of the content.
async fn discard_meta(store: &CacheStore, key: &CacheKey) {
    let meta_path = keys::meta_path_impl(&store.cache_dir, key);
    if let Err(e) = fs::remove_file(&meta_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(key = %key, error = %e, "failed to remove stale cache metadata");
        }
    }
}
