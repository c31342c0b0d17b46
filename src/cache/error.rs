//! Error taxonomy for the caching core.
//!
//! Every fallible internal step returns one of these types. The public cache API
//! converts them into absent values or outcome enums; nothing here is meant to
//! reach an end user.

use thiserror::Error;

/// Failure while talking to a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded: {used} + {requested} bytes over limit of {limit}")]
    QuotaExceeded {
        used: u64,
        requested: u64,
        limit: u64,
    },
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// Failure of a key/value cache operation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("ttl must be greater than zero")]
    InvalidTtl,
}

/// Failure of the remote broadcast channel or change feed.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("publish to `{topic}` failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("subscribe to `{topic}` failed: {reason}")]
    Subscribe { topic: String, reason: String },
}

impl TransportError {
    pub fn publish(topic: &str, reason: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }

    pub fn subscribe(topic: &str, reason: impl Into<String>) -> Self {
        Self::Subscribe {
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure while fetching a remote resource.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("`{url}` responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("network error fetching `{url}`: {reason}")]
    Network { url: String, reason: String },
    #[error("body of `{url}` could not be read: {reason}")]
    Body { url: String, reason: String },
}

/// Failure of an image preload, surfaced to the caller of `preload` only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageCacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("image `{url}` could not be stored: {reason}")]
    Store { url: String, reason: String },
}
