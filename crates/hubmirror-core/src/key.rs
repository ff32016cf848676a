//! Cache key derivation.
//!
//! A request path such as `org/model/resolve/main/config.json` maps 1:1 to
//! both the upstream URL and the on-disk location, so it is validated before
//! anything touches the filesystem:
//!
//! - `""`, `"foo/"` → rejected (empty / trailing separator)
//! - `"a//b"`, `"./a"`, `"a/../b"` → rejected (empty or traversal segment)
//! - `"/org/model"` → `org/model` (one leading separator is tolerated)
//! - `".hubmirror/..."` → rejected (reserved for store internals)

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{MirrorError, MirrorResult};

/// Top-level directory under the cache root reserved for temp files and
/// sidecar metadata.
pub const RESERVED_DIR: &str = ".hubmirror";

/// A normalized relative path identifying one upstream resource and one
/// cache location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Parse and validate a request path.
    ///
    /// # Examples
    ///
    /// ```
    /// use hubmirror_core::CacheKey;
    ///
    /// let key = CacheKey::parse("org/model/resolve/main/file.bin").unwrap();
    /// assert_eq!(key.as_str(), "org/model/resolve/main/file.bin");
    ///
    /// assert!(CacheKey::parse("").is_err());
    /// assert!(CacheKey::parse("org/model/").is_err());
    /// assert!(CacheKey::parse("org/../../etc/passwd").is_err());
    /// ```
    pub fn parse(path: &str) -> MirrorResult<Self> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);

        if trimmed.is_empty() {
            return Err(MirrorError::invalid_path(path, "empty path"));
        }

        if trimmed.ends_with('/') {
            return Err(MirrorError::invalid_path(path, "trailing separator"));
        }

        for segment in trimmed.split('/') {
            validate_segment(path, segment)?;
        }

        if trimmed.split('/').next() == Some(RESERVED_DIR) {
            return Err(MirrorError::invalid_path(path, "reserved prefix"));
        }

        // Catches platform-specific prefixes (e.g. `C:` on Windows) that
        // the segment checks above do not know about.
        if !Path::new(trimmed)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(MirrorError::invalid_path(path, "path escapes cache root"));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Key as a `/`-separated string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Location of this key under `root`.
    pub fn to_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(self.segments());
        path
    }
}

fn validate_segment(path: &str, segment: &str) -> MirrorResult<()> {
    match segment {
        "" => Err(MirrorError::invalid_path(path, "empty segment")),
        "." | ".." => Err(MirrorError::invalid_path(path, "traversal segment")),
        s if s.contains('\\') || s.contains('\0') => {
            Err(MirrorError::invalid_path(path, "invalid character in segment"))
        }
        _ => Ok(()),
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
