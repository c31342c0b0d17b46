//! Cache entry envelope and lookup results.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A cached value plus the metadata needed to judge whether it may still be served.
///
/// Each backend stores its own serialized copy; entries are never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub schema_version: String,
}

impl<T> CacheEntry<T> {
    /// True once `now` is strictly past the expiry instant.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    pub fn matches_version(&self, version: &str) -> bool {
        self.schema_version == version
    }
}

/// Outcome of reading one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Hit(T),
    Miss,
    /// The entry was past its expiry and has been deleted.
    Expired,
    /// The entry carried a stale schema version and has been deleted.
    VersionMismatch,
}

impl<T> Lookup<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Miss | Self::Expired | Self::VersionMismatch => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}
