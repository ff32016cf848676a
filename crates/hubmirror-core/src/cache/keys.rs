//! Path derivation for content, sidecars and temp files.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::key::{CacheKey, RESERVED_DIR};

pub(crate) fn content_path_impl(cache_dir: &Path, key: &CacheKey) -> PathBuf {
    key.to_path(cache_dir)
}

pub(crate) fn tmp_dir_impl(cache_dir: &Path) -> PathBuf {
    cache_dir.join(RESERVED_DIR).join("tmp")
}

pub(crate) fn meta_dir_impl(cache_dir: &Path) -> PathBuf {
    cache_dir.join(RESERVED_DIR).join("meta")
}

/// `{meta_dir}/{sha256(key)}.json`
///
/// Flat and fixed-length, so a sidecar never shares a directory layout with
/// the content tree and never outgrows the filesystem's name limit.
pub(crate) fn meta_path_impl(cache_dir: &Path, key: &CacheKey) -> PathBuf {
    let hash = Sha256::digest(key.as_str().as_bytes());
    meta_dir_impl(cache_dir).join(format!("{:x}.json", hash))
}

/// Fresh temp path; the tmp dir shares a filesystem with the content tree.
pub(crate) fn temp_path_impl(cache_dir: &Path) -> PathBuf {
    tmp_dir_impl(cache_dir).join(format!("{}.part", Uuid::new_v4()))
}
