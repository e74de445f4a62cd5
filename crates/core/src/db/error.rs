//! Error type shared by every cache component.

use std::path::PathBuf;
use thiserror::Error;

use crate::vocabulary::VocabularyDomain;

/// Errors for cache operations.
///
/// "Not found" is never an error: probes return `bool`, fetches return
/// `Option`, and deletes of absent rows return `false`.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store could not be opened, created or initialized.
    #[error("Failed to open store at {path}: {reason}")]
    StoreOpen { path: PathBuf, reason: String },

    /// A live cache already owns this store path.
    #[error("Store already initialized: {path}")]
    AlreadyInitialized { path: PathBuf },

    /// Lock contention outlasted the configured busy timeout.
    #[error("Store busy for {waited_ms} ms")]
    StoreBusy { waited_ms: u64 },

    #[error("Unknown {domain} vocabulary entry: {value}")]
    UnknownVocabulary {
        domain: VocabularyDomain,
        value: String,
    },

    #[error("Unknown torrent id: {0}")]
    UnknownTorrent(i64),

    #[error("Peer already exists: {0}")]
    DuplicatePeer(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The cache was closed; no further reads or writes are accepted.
    #[error("Cache is closed")]
    Closed,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    pub(crate) fn unknown_vocabulary(domain: VocabularyDomain, value: impl ToString) -> Self {
        Self::UnknownVocabulary {
            domain,
            value: value.to_string(),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreBusy { .. })
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}
