//! Error types for the chat cache.
//!
//! Public cache operations absorb these and log them; they surface only
//! through the lower-level storage and remote APIs.

use thiserror::Error;

/// Result type alias for internal cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Failures of a [`KeyValueStore`](crate::storage::KeyValueStore).
#[derive(Error, Debug)]
pub enum StorageError {
    /// No durable storage exists in this execution context.
    #[error("durable storage is not available in this context")]
    Unavailable,

    #[error("storage I/O failed for key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend refused the operation (quota, security policy, ...).
    #[error("storage backend rejected key '{key}': {message}")]
    Backend { key: String, message: String },
}

impl StorageError {
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            key: key.into(),
            source,
        }
    }

    pub fn backend(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Failures talking to the remote persistence API.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid endpoint: {0}")]
    Url(#[from] url::ParseError),

    #[error("remote rejected the request: {0}")]
    Rejected(String),
}

/// Internal failures of cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("stored value under '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error(
        "stored value under '{key}' uses format version {found}, newer than supported version {supported}"
    )]
    UnsupportedVersion {
        key: String,
        found: u32,
        supported: u32,
    },

    #[error("failed to encode value for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}
