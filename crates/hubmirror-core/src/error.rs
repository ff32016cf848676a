//! Error types for the mirror.

use reqwest::StatusCode;

/// Mirror errors.
///
/// `Clone` because one fetch outcome is delivered to every request that
/// joined it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MirrorError {
    /// Malformed request path (empty, trailing separator, traversal).
    #[error("invalid path {path:?}: {reason}")]
    NotFoundPath { path: String, reason: String },

    /// Upstream answered a miss with a non-200 status.
    #[error("upstream returned HTTP {status}")]
    UpstreamStatus { status: u16 },

    /// Upstream could not be reached (timeout, connection, DNS).
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    /// Disk error while writing a cache entry.
    #[error("cache write failed: {message}")]
    CacheWrite { message: String },

    /// Key is not present in the cache.
    #[error("not cached: {key}")]
    NotFound { key: String },

    /// Disk error while reading a cache entry.
    #[error("cache error: {message}")]
    Cache { message: String },

    /// The fetch task stopped before delivering an outcome.
    #[error("fetch cancelled before completion")]
    Cancelled,

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl MirrorError {
    /// HTTP status the failure maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFoundPath { .. } | Self::NotFound { .. } => StatusCode::NOT_FOUND,

            // Propagated verbatim; out-of-range codes degrade to 502.
            Self::UpstreamStatus { status } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,

            Self::CacheWrite { .. } | Self::Cache { .. } | Self::Config { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub(crate) fn invalid_path(path: &str, reason: &str) -> Self {
        Self::NotFoundPath {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for MirrorError {
    fn from(err: reqwest::Error) -> Self {
        Self::UpstreamUnavailable {
            message: err.to_string(),
        }
    }
}

/// Result type for mirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;
