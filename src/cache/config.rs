//! Cache configuration.
//!
//! Controls the key/value cache, the image preloader and the invalidation bus via
//! the `[cache]`, `[images]` and `[invalidation]` tables of `storefront-cache.toml`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::backend::BackendKind;
use super::keys;

// Default values for cache configuration
const DEFAULT_KEY_PREFIX: &str = "cache_";
const DEFAULT_VERSION: &str = "1.0.0";
const DEFAULT_DURABLE_DIR: &str = ".storefront-cache";
const DEFAULT_DURABLE_QUOTA_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_SESSION_QUOTA_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_IMAGE_MAX_ITEM_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MEDIUM_BATCH_SIZE: usize = 3;
const DEFAULT_LOW_PRIORITY_DELAY_MS: u64 = 100;
const DEFAULT_TOPIC: &str = "cache_invalidation";

/// Key/value cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Reserved prefix prepended to every stored key.
    pub key_prefix: String,
    /// Schema version entries are stamped with at startup.
    pub initial_version: String,
    /// TTL applied when `set` is called without one.
    pub default_ttl_ms: u64,
    /// Backend used when a call does not name one.
    pub default_backend: BackendKind,
    /// Directory of the durable store.
    pub durable_dir: PathBuf,
    /// Byte quota of the durable store.
    pub durable_quota_bytes: u64,
    /// Byte quota of the session store.
    pub session_quota_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            initial_version: DEFAULT_VERSION.to_string(),
            default_ttl_ms: keys::MEDIUM.as_millis() as u64,
            default_backend: BackendKind::Durable,
            durable_dir: PathBuf::from(DEFAULT_DURABLE_DIR),
            durable_quota_bytes: DEFAULT_DURABLE_QUOTA_BYTES,
            session_quota_bytes: DEFAULT_SESSION_QUOTA_BYTES,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

/// Image preloader configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageCacheConfig {
    /// Largest payload cached per image; larger fetches are discarded.
    pub max_item_bytes: u64,
    /// TTL of cached images.
    pub ttl_ms: u64,
    /// Images fetched together per chunk at medium priority.
    pub medium_batch_size: usize,
    /// Pause between images at low priority.
    pub low_priority_delay_ms: u64,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            max_item_bytes: DEFAULT_IMAGE_MAX_ITEM_BYTES,
            ttl_ms: keys::DAY.as_millis() as u64,
            medium_batch_size: DEFAULT_MEDIUM_BATCH_SIZE,
            low_priority_delay_ms: DEFAULT_LOW_PRIORITY_DELAY_MS,
        }
    }
}

impl ImageCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn low_priority_delay(&self) -> Duration {
        Duration::from_millis(self.low_priority_delay_ms)
    }

    /// Medium-priority chunk size, clamped to at least one.
    pub fn medium_batch_size_non_zero(&self) -> usize {
        self.medium_batch_size.max(1)
    }
}

/// Invalidation bus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    /// Broadcast topic shared by every session.
    pub topic: String,
    /// TTL of values stored by `force_refresh`.
    pub force_refresh_ttl_ms: u64,
    /// Source key → derived keys dropped alongside it on admin-originated events.
    pub cascade: BTreeMap<String, Vec<String>>,
    /// Backend resource → cache keys it feeds.
    pub resources: BTreeMap<String, Vec<String>>,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            force_refresh_ttl_ms: keys::SHORT.as_millis() as u64,
            cascade: owned_table(keys::default_cascade()),
            resources: owned_table(keys::default_resource_keys()),
        }
    }
}

impl InvalidationConfig {
    pub fn force_refresh_ttl(&self) -> Duration {
        Duration::from_millis(self.force_refresh_ttl_ms)
    }

    /// Keys derived from `key`, empty when it has none.
    pub fn cascade_for(&self, key: &str) -> &[String] {
        self.cascade.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Cache keys fed by `resource`, empty when it is unknown.
    pub fn keys_for_resource(&self, resource: &str) -> &[String] {
        self.resources
            .get(resource)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn owned_table(table: Vec<(&'static str, Vec<&'static str>)>) -> BTreeMap<String, Vec<String>> {
    table
        .into_iter()
        .map(|(source, targets)| {
            (
                source.to_string(),
                targets.into_iter().map(str::to_string).collect(),
            )
        })
        .collect()
}
