//! On-disk cache store.
//!
//! The tree under the cache root mirrors the upstream path hierarchy 1:1.
//! Content only ever appears at its final path through a rename, so a path
//! is either complete or absent.
//!
//! # Cache Structure
//!
//! ```text
//! {cache_dir}/
//!   {namespace}/{name}/resolve/{revision}/{file}   # content
//!   .hubmirror/
//!     tmp/{uuid}.part                               # in-progress writes
//!     meta/{sha256(key)}.json                       # CacheMeta sidecar
//! ```

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::error::MirrorResult;
use crate::key::CacheKey;

mod io;
mod keys;
mod read;

/// Sidecar metadata stored next to the content tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    /// Content type reported by the upstream.
    pub content_type: String,

    /// Bytes written.
    pub content_length: u64,

    /// When the entry was fetched.
    pub fetched_at: DateTime<Utc>,

    /// ETag reported by the upstream.
    #[serde(default)]
    pub etag: Option<String>,

    /// URL the content was fetched from.
    #[serde(default)]
    pub upstream_url: Option<String>,
}

/// Description of a content write, recorded as [`CacheMeta`].
#[derive(Debug, Clone, Default)]
pub struct WriteMeta {
    /// Content type; `None` records the generic binary type.
    pub content_type: Option<String>,

    /// Declared length; a mismatch with the bytes received fails the write.
    pub expected_length: Option<u64>,

    /// ETag reported by the upstream.
    pub etag: Option<String>,

    /// URL the content was fetched from.
    pub upstream_url: Option<String>,
}

/// A complete cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Key of the entry.
    pub key: CacheKey,

    /// Final path of the content.
    pub path: PathBuf,

    /// Content type recorded at write time.
    pub content_type: String,

    /// Content size in bytes.
    pub size: u64,

    /// When the entry was fetched, if the sidecar is readable.
    pub fetched_at: Option<DateTime<Utc>>,
}

/// An opened cache entry, ready to stream.
#[derive(Debug)]
pub struct CachedFile {
    /// Entry description.
    pub entry: CacheEntry,

    /// Open handle positioned at the start of the content.
    pub file: File,
}

impl CachedFile {
    /// Stream the content in chunks.
    pub fn into_stream(self) -> ReaderStream<File> {
        ReaderStream::new(self.file)
    }
}

/// Cache store owning the on-disk tree.
#[derive(Debug, Clone)]
pub struct CacheStore {
    /// Base cache directory.
    cache_dir: PathBuf,
}

impl CacheStore {
    /// Create a store over `cache_dir` without touching the filesystem.
    pub fn with_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Create the directory layout and remove temp files left by a crash.
    pub async fn open_root(cache_dir: impl Into<PathBuf>) -> MirrorResult<Self> {
        let store = Self::with_dir(cache_dir);
        io::prepare_root_impl(&store).await?;
        Ok(store)
    }

    /// Get the cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Final content path of a key.
    pub fn content_path(&self, key: &CacheKey) -> PathBuf {
        keys::content_path_impl(&self.cache_dir, key)
    }

    /// Whether a complete entry exists for `key`.
    pub async fn exists(&self, key: &CacheKey) -> bool {
        read::exists_impl(self, key).await
    }

    /// Describe an entry without opening its content.
    pub async fn entry(&self, key: &CacheKey) -> MirrorResult<Option<CacheEntry>> {
        read::entry_impl(self, key).await
    }

    /// Open an entry for streaming; `NotFound` if absent.
    pub async fn open(&self, key: &CacheKey) -> MirrorResult<CachedFile> {
        read::open_impl(self, key).await
    }

    /// Stream `body` into the cache and atomically publish it under `key`.
    ///
    /// On any failure, including the returned future being dropped, the
    /// temp file is removed and nothing appears at the final path.
    pub async fn write_atomic<S>(
        &self,
        key: &CacheKey,
        meta: WriteMeta,
        body: S,
    ) -> MirrorResult<CacheEntry>
    where
        S: Stream<Item = MirrorResult<Bytes>> + Unpin + Send,
    {
        io::write_atomic_impl(self, key, meta, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MirrorError;
    use crate::types::DEFAULT_CONTENT_TYPE;
    use futures::stream;
    use futures::StreamExt;
    use tempfile::TempDir;
    use tokio::fs;

    async fn create_test_store() -> (CacheStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::open_root(temp_dir.path().join("cache"))
            .await
            .unwrap();
        (store, temp_dir)
    }

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = MirrorResult<Bytes>> + Unpin + Send {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    fn text_meta() -> WriteMeta {
        WriteMeta {
            content_type: Some("text/plain".to_string()),
            ..Default::default()
        }
    }

    async fn read_all(store: &CacheStore, key: &CacheKey) -> Vec<u8> {
        let cached = store.open(key).await.unwrap();
        let mut body = cached.into_stream();
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    async fn tmp_files(store: &CacheStore) -> usize {
        let mut count = 0;
        let mut entries = fs::read_dir(keys::tmp_dir_impl(store.cache_dir()))
            .await
            .unwrap();
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn test_cache_roundtrip() {
        let (store, _temp_dir) = create_test_store().await;
        let key = CacheKey::parse("org/model/file.bin").unwrap();

        let entry = store
            .write_atomic(&key, text_meta(), chunks(&["a", "bc"]))
            .await
            .unwrap();
        assert_eq!(entry.size, 3);
        assert_eq!(entry.content_type, "text/plain");

        assert!(store.exists(&key).await);
        let cached = store.open(&key).await.unwrap();
        assert_eq!(cached.entry.content_type, "text/plain");
        assert_eq!(cached.entry.size, 3);
        assert_eq!(read_all(&store, &key).await, b"abc");
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let (store, _temp_dir) = create_test_store().await;
        let key = CacheKey::parse("org/model/missing.bin").unwrap();

        assert!(!store.exists(&key).await);
        assert!(store.entry(&key).await.unwrap().is_none());
        let err = store.open(&key).await.unwrap_err();
        assert!(matches!(err, MirrorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_directory_is_not_an_entry() {
        let (store, _temp_dir) = create_test_store().await;
        let file = CacheKey::parse("org/model/file.bin").unwrap();
        store
            .write_atomic(&file, text_meta(), chunks(&["x"]))
            .await
            .unwrap();

        let dir = CacheKey::parse("org/model").unwrap();
        assert!(!store.exists(&dir).await);
        assert!(matches!(
            store.open(&dir).await.unwrap_err(),
            MirrorError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_stream_failure_leaves_nothing() {
        let (store, _temp_dir) = create_test_store().await;
        let key = CacheKey::parse("org/model/broken.bin").unwrap();

        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(MirrorError::UpstreamUnavailable {
                message: "connection reset".to_string(),
            }),
        ]);

        let err = store
            .write_atomic(&key, text_meta(), body)
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::UpstreamUnavailable { .. }));

        assert!(!store.exists(&key).await);
        assert!(!store.content_path(&key).exists());
        assert_eq!(tmp_files(&store).await, 0, "temp file should be discarded");
    }

    #[tokio::test]
    async fn test_length_mismatch_rejected() {
        let (store, _temp_dir) = create_test_store().await;
        let key = CacheKey::parse("org/model/short.bin").unwrap();

        let meta = WriteMeta {
            expected_length: Some(10),
            ..text_meta()
        };
        let err = store
            .write_atomic(&key, meta, chunks(&["abc"]))
            .await
            .unwrap_err();

        assert!(matches!(err, MirrorError::UpstreamUnavailable { .. }));
        assert!(!store.exists(&key).await);
        assert_eq!(tmp_files(&store).await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_write_discards_temp() {
        let (store, _temp_dir) = create_test_store().await;
        let key = CacheKey::parse("org/model/slow.bin").unwrap();

        // First chunk arrives, then the body stalls forever.
        let body = stream::iter(vec![Ok(Bytes::from_static(b"head"))]).chain(stream::pending());
        let write = store.write_atomic(&key, text_meta(), Box::pin(body));

        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(50), write).await;
        assert!(timed_out.is_err());

        assert!(!store.exists(&key).await);
        assert_eq!(tmp_files(&store).await, 0);
    }

    #[tokio::test]
    async fn test_missing_sidecar_defaults_content_type() {
        let (store, _temp_dir) = create_test_store().await;
        let key = CacheKey::parse("org/model/file.bin").unwrap();
        store
            .write_atomic(&key, text_meta(), chunks(&["abc"]))
            .await
            .unwrap();

        fs::remove_file(keys::meta_path_impl(store.cache_dir(), &key))
            .await
            .unwrap();

        let entry = store.entry(&key).await.unwrap().unwrap();
        assert_eq!(entry.content_type, DEFAULT_CONTENT_TYPE);
        assert!(entry.fetched_at.is_none());
        assert_eq!(entry.size, 3);
    }

    #[tokio::test]
    async fn test_corrupt_sidecar_defaults_content_type() {
        let (store, _temp_dir) = create_test_store().await;
        let key = CacheKey::parse("org/model/file.bin").unwrap();
        store
            .write_atomic(&key, text_meta(), chunks(&["abc"]))
            .await
            .unwrap();

        fs::write(keys::meta_path_impl(store.cache_dir(), &key), "not json{{")
            .await
            .unwrap();

        let entry = store.entry(&key).await.unwrap().unwrap();
        assert_eq!(entry.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_extension_sibling_keys_both_cache() {
        let (store, _temp_dir) = create_test_store().await;
        let plain = CacheKey::parse("org/model/resolve/main/config").unwrap();
        let nested = CacheKey::parse("org/model/resolve/main/config.json/extra.txt").unwrap();

        store
            .write_atomic(&plain, text_meta(), chunks(&["abc"]))
            .await
            .unwrap();
        store
            .write_atomic(&nested, text_meta(), chunks(&["def"]))
            .await
            .unwrap();

        assert_eq!(read_all(&store, &plain).await, b"abc");
        assert_eq!(read_all(&store, &nested).await, b"def");
        let entry = store.entry(&nested).await.unwrap().unwrap();
        assert_eq!(entry.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_max_length_file_name_caches() {
        let (store, _temp_dir) = create_test_store().await;
        let key = CacheKey::parse(&format!("org/model/{}", "x".repeat(252))).unwrap();

        let entry = store
            .write_atomic(&key, text_meta(), chunks(&["abc"]))
            .await
            .unwrap();
        assert_eq!(entry.size, 3);

        let cached = store.entry(&key).await.unwrap().unwrap();
        assert_eq!(cached.content_type, "text/plain");
        assert_eq!(read_all(&store, &key).await, b"abc");
    }

    #[tokio::test]
    async fn test_sidecar_failure_still_commits_content() {
        let (store, _temp_dir) = create_test_store().await;
        let key = CacheKey::parse("org/model/file.bin").unwrap();

        // A file where the metadata directory should be.
        let meta_dir = keys::meta_dir_impl(store.cache_dir());
        fs::remove_dir_all(&meta_dir).await.unwrap();
        fs::write(&meta_dir, b"in the way").await.unwrap();

        let entry = store
            .write_atomic(&key, text_meta(), chunks(&["abc"]))
            .await
            .unwrap();
        assert_eq!(entry.size, 3);

        assert!(store.exists(&key).await);
        assert_eq!(read_all(&store, &key).await, b"abc");
        let cached = store.entry(&key).await.unwrap().unwrap();
        assert_eq!(cached.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(tmp_files(&store).await, 0);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let (store, _temp_dir) = create_test_store().await;
        let key = CacheKey::parse("org/model/file.bin").unwrap();

        store
            .write_atomic(&key, text_meta(), chunks(&["old content"]))
            .await
            .unwrap();
        store
            .write_atomic(&key, text_meta(), chunks(&["new"]))
            .await
            .unwrap();

        assert_eq!(read_all(&store, &key).await, b"new");
    }

    #[tokio::test]
    async fn test_open_root_removes_stale_parts() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("cache");
        let tmp = keys::tmp_dir_impl(&root);
        fs::create_dir_all(&tmp).await.unwrap();
        fs::write(tmp.join("stale.part"), b"leftover").await.unwrap();

        let store = CacheStore::open_root(&root).await.unwrap();
        assert_eq!(tmp_files(&store).await, 0);
    }

    #[tokio::test]
    async fn test_write_under_file_parent_fails_cleanly() {
        let (store, _temp_dir) = create_test_store().await;
        let file = CacheKey::parse("org/model").unwrap();
        store
            .write_atomic(&file, text_meta(), chunks(&["x"]))
            .await
            .unwrap();

        let nested = CacheKey::parse("org/model/file.bin").unwrap();
        let err = store
            .write_atomic(&nested, text_meta(), chunks(&["y"]))
            .await
            .unwrap_err();

        assert!(matches!(err, MirrorError::CacheWrite { .. }));
        assert_eq!(tmp_files(&store).await, 0);
    }
}
