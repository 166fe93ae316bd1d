//! Error types for the result cache

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by cache key computation, folder resolution and entry I/O
///
/// A missing entry is not an error: lookups return `Ok(None)` for that case.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The request cannot be fingerprinted (empty query text, empty target)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The cache folder name is empty or escapes the cache root
    #[error("Invalid cache folder: '{0}'")]
    InvalidFolder(String),

    /// A matching entry exists but cannot be used
    #[error("Corrupt cache entry {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// A matching entry exists but could not be read
    #[error("Failed to read cache entry {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisting an entry failed (permissions, disk full, ...)
    #[error("Failed to write cache entry {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The pseudo-URI is not of the form `cache://<folder>[/<selector>]`
    #[error("Invalid cache URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
}

impl CacheError {
    /// Whether the caller should treat this failure as a cache miss
    ///
    /// Corrupt or unreadable entries are skipped; the live query still runs.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CacheError::Corrupt { .. } | CacheError::Read { .. } | CacheError::Write { .. }
        )
    }
}
