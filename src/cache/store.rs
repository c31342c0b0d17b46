//! Tiered key/value cache with TTL and version semantics.
//!
//! The cache sits in front of three [`StorageBackend`]s. Writes that a durable or
//! session backend refuses (quota, I/O) fall back to the memory backend; reads
//! follow the same path. Failures never reach the caller: the public API turns
//! them into misses or outcome values and logs them.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::backend::{BackendKind, DurableStore, MemoryStore, SessionStore, StorageBackend};
use super::config::CacheConfig;
use super::entry::{CacheEntry, Lookup};
use super::error::{CacheError, StorageError};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

const METRIC_HIT: &str = "storefront_cache_hit_total";
const METRIC_MISS: &str = "storefront_cache_miss_total";
const METRIC_EXPIRED: &str = "storefront_cache_expired_total";
const METRIC_FALLBACK: &str = "storefront_cache_fallback_total";

/// Per-call options for [`KeyValueCache::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub version: Option<String>,
    pub backend: Option<BackendKind>,
}

impl SetOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }
}

/// What happened to a `set` call.
#[derive(Debug)]
pub enum SetOutcome {
    /// Stored in the requested backend.
    Stored(BackendKind),
    /// The requested backend refused the write; the entry lives in memory instead.
    FellBack {
        requested: BackendKind,
        error: StorageError,
    },
    /// Nothing was stored.
    Rejected(CacheError),
}

impl SetOutcome {
    pub fn is_stored(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Which backends a `clear` touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Backend(BackendKind),
    All,
}

impl ClearScope {
    fn kinds(self) -> Vec<BackendKind> {
        match self {
            Self::Backend(kind) => vec![kind],
            Self::All => BackendKind::ALL.to_vec(),
        }
    }
}

/// Result of an expired-entry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
}

/// Number of reserved-prefix keys held per backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory: usize,
    pub durable: usize,
    pub session: usize,
}

impl CacheStats {
    pub fn total(&self) -> usize {
        self.memory + self.durable + self.session
    }
}

/// Key/value cache over the memory, durable and session backends.
pub struct KeyValueCache {
    config: CacheConfig,
    version: RwLock<String>,
    memory: Arc<dyn StorageBackend>,
    durable: Arc<dyn StorageBackend>,
    session: Arc<dyn StorageBackend>,
}

impl KeyValueCache {
    /// Build a cache over explicit backends and sweep expired entries left behind
    /// by earlier processes.
    pub fn with_backends(
        config: CacheConfig,
        memory: Arc<dyn StorageBackend>,
        durable: Arc<dyn StorageBackend>,
        session: Arc<dyn StorageBackend>,
    ) -> Self {
        let cache = Self {
            version: RwLock::new(config.initial_version.clone()),
            config,
            memory,
            durable,
            session,
        };

        let report = cache.sweep_expired();
        if report.removed > 0 {
            info!(
                scanned = report.scanned,
                removed = report.removed,
                "Startup sweep removed stale cache entries"
            );
        }

        cache
    }

    /// Open the durable store at `config.durable_dir` and build a cache over it.
    pub fn open(config: CacheConfig) -> Result<Self, StorageError> {
        let durable = DurableStore::open(&config.durable_dir, config.durable_quota_bytes)?;
        let session = SessionStore::new(config.session_quota_bytes);
        Ok(Self::with_backends(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(durable),
            Arc::new(session),
        ))
    }

    /// Build a cache whose durable slot is a quota-limited in-memory map.
    ///
    /// Nothing outlives the process; used by tests and hosts without a writable
    /// directory.
    pub fn in_memory(config: CacheConfig) -> Self {
        let durable = SessionStore::new(config.durable_quota_bytes);
        let session = SessionStore::new(config.session_quota_bytes);
        Self::with_backends(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(durable),
            Arc::new(session),
        )
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Current global schema version.
    pub fn version(&self) -> String {
        rw_read(&self.version, SOURCE, "version").clone()
    }

    fn backend(&self, kind: BackendKind) -> &dyn StorageBackend {
        match kind {
            BackendKind::Memory => self.memory.as_ref(),
            BackendKind::Durable => self.durable.as_ref(),
            BackendKind::Session => self.session.as_ref(),
        }
    }

    fn resolve(&self, backend: Option<BackendKind>) -> BackendKind {
        backend.unwrap_or(self.config.default_backend)
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.config.key_prefix)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Store `value` under `key`. Never fails; see [`SetOutcome`].
    pub fn set<T: Serialize>(&self, key: &str, value: &T, options: SetOptions) -> SetOutcome {
        match self.try_set(key, value, options) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(key, error = %error, "Cache write rejected");
                SetOutcome::Rejected(error)
            }
        }
    }

    /// Store `value`, reporting serialization, TTL and memory-tier failures as errors.
    pub fn try_set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<SetOutcome, CacheError> {
        let ttl = options.ttl.unwrap_or_else(|| self.config.default_ttl());
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl);
        }
        let ttl = time::Duration::try_from(ttl).map_err(|_| CacheError::InvalidTtl)?;

        let created_at = OffsetDateTime::now_utc();
        let expires_at = created_at
            .checked_add(ttl)
            .ok_or(CacheError::InvalidTtl)?;
        let entry = CacheEntry {
            data: value,
            created_at,
            expires_at,
            schema_version: options.version.unwrap_or_else(|| self.version()),
        };
        let blob = serde_json::to_string(&entry)?;

        let requested = self.resolve(options.backend);
        let storage_key = self.storage_key(key);

        match self.backend(requested).write(&storage_key, blob.clone()) {
            Ok(()) => {
                if requested != BackendKind::Memory {
                    self.remove_quietly(BackendKind::Memory, &storage_key);
                }
                Ok(SetOutcome::Stored(requested))
            }
            Err(error) if requested != BackendKind::Memory => {
                warn!(
                    key,
                    backend = %requested,
                    error = %error,
                    "Cache write failed, falling back to memory"
                );
                counter!(METRIC_FALLBACK, "backend" => requested.as_str()).increment(1);
                // The refused backend may still hold an older entry that reads would prefer.
                self.remove_quietly(requested, &storage_key);
                self.memory.write(&storage_key, blob)?;
                Ok(SetOutcome::FellBack { requested, error })
            }
            Err(error) => Err(error.into()),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Return the live value under `key`, or `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, backend: Option<BackendKind>) -> Option<T> {
        self.lookup(key, backend).into_value()
    }

    /// `get(key).is_some()`, with identical staleness rules.
    pub fn has(&self, key: &str, backend: Option<BackendKind>) -> bool {
        self.get::<IgnoredAny>(key, backend).is_some()
    }

    /// Read `key`, reporting why a value was not served.
    pub fn lookup<T: DeserializeOwned>(&self, key: &str, backend: Option<BackendKind>) -> Lookup<T> {
        match self.try_lookup(key, backend) {
            Ok(lookup) => lookup,
            Err(error) => {
                warn!(key, error = %error, "Cache read failed");
                counter!(METRIC_MISS).increment(1);
                Lookup::Miss
            }
        }
    }

    /// Read `key`, surfacing backend and decode failures.
    pub fn try_lookup<T: DeserializeOwned>(
        &self,
        key: &str,
        backend: Option<BackendKind>,
    ) -> Result<Lookup<T>, CacheError> {
        let requested = self.resolve(backend);
        let storage_key = self.storage_key(key);

        let mut tier = requested;
        let mut blob = if requested == BackendKind::Memory {
            self.memory.read(&storage_key)?
        } else {
            match self.backend(requested).read(&storage_key) {
                Ok(blob) => blob,
                Err(error) => {
                    warn!(
                        key,
                        backend = %requested,
                        error = %error,
                        "Cache read failed, checking memory tier"
                    );
                    None
                }
            }
        };
        if blob.is_none() && requested != BackendKind::Memory {
            tier = BackendKind::Memory;
            blob = self.memory.read(&storage_key)?;
        }

        let Some(blob) = blob else {
            counter!(METRIC_MISS).increment(1);
            return Ok(Lookup::Miss);
        };

        let entry: CacheEntry<T> = serde_json::from_str(&blob)?;

        if entry.is_expired_at(OffsetDateTime::now_utc()) {
            debug!(key, backend = %tier, "Cache entry expired");
            self.remove_quietly(tier, &storage_key);
            counter!(METRIC_EXPIRED).increment(1);
            return Ok(Lookup::Expired);
        }

        if !entry.matches_version(&self.version()) {
            debug!(
                key,
                backend = %tier,
                entry_version = %entry.schema_version,
                "Cache entry version mismatch"
            );
            self.remove_quietly(tier, &storage_key);
            counter!(METRIC_MISS).increment(1);
            return Ok(Lookup::VersionMismatch);
        }

        counter!(METRIC_HIT, "backend" => tier.as_str()).increment(1);
        Ok(Lookup::Hit(entry.data))
    }

    /// Logical keys (without prefix) currently stored in `kind`.
    pub fn keys(&self, kind: BackendKind) -> Vec<String> {
        let prefix = &self.config.key_prefix;
        match self.backend(kind).list_keys(prefix) {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|key| key.strip_prefix(prefix.as_str()).map(str::to_string))
                .collect(),
            Err(error) => {
                warn!(backend = %kind, error = %error, "Cache key listing failed");
                Vec::new()
            }
        }
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove `key` from `backend` and from the memory fallback tier. Idempotent.
    pub fn delete(&self, key: &str, backend: Option<BackendKind>) {
        let requested = self.resolve(backend);
        let storage_key = self.storage_key(key);
        self.remove_quietly(requested, &storage_key);
        if requested != BackendKind::Memory {
            self.remove_quietly(BackendKind::Memory, &storage_key);
        }
    }

    /// Remove `key` from every backend. Idempotent.
    pub fn purge(&self, key: &str) {
        let storage_key = self.storage_key(key);
        for kind in BackendKind::ALL {
            self.remove_quietly(kind, &storage_key);
        }
    }

    fn remove_quietly(&self, kind: BackendKind, storage_key: &str) {
        if let Err(error) = self.backend(kind).remove(storage_key) {
            warn!(
                key = storage_key,
                backend = %kind,
                error = %error,
                "Cache deletion failed"
            );
        }
    }

    /// Remove every reserved-prefix key in `scope`; foreign keys are untouched.
    ///
    /// Returns the number of keys removed.
    pub fn clear(&self, scope: ClearScope) -> usize {
        let mut removed = 0;
        for kind in scope.kinds() {
            let keys = match self.backend(kind).list_keys(&self.config.key_prefix) {
                Ok(keys) => keys,
                Err(error) => {
                    warn!(backend = %kind, error = %error, "Cache clear failed");
                    continue;
                }
            };
            for key in keys {
                match self.backend(kind).remove(&key) {
                    Ok(()) => removed += 1,
                    Err(error) => {
                        warn!(key, backend = %kind, error = %error, "Cache clear failed")
                    }
                }
            }
        }
        debug!(scope = ?scope, removed, "Cache cleared");
        removed
    }

    /// Switch the global schema version and drop every entry.
    pub fn update_version(&self, version: impl Into<String>) {
        let version = version.into();
        *rw_write(&self.version, SOURCE, "update_version") = version.clone();
        let removed = self.clear(ClearScope::All);
        info!(version = %version, removed, "Cache version updated");
    }

    /// Remove expired and undecodable entries from every backend.
    pub fn sweep_expired(&self) -> SweepReport {
        let now = OffsetDateTime::now_utc();
        let mut report = SweepReport::default();

        for kind in BackendKind::ALL {
            let backend = self.backend(kind);
            let keys = match backend.list_keys(&self.config.key_prefix) {
                Ok(keys) => keys,
                Err(error) => {
                    warn!(backend = %kind, error = %error, "Cache sweep failed");
                    continue;
                }
            };

            for key in keys {
                report.scanned += 1;
                let stale = match backend.read(&key) {
                    Ok(Some(blob)) => serde_json::from_str::<CacheEntry<IgnoredAny>>(&blob)
                        .map(|entry| entry.is_expired_at(now))
                        .unwrap_or(true),
                    Ok(None) => false,
                    Err(error) => {
                        warn!(key, backend = %kind, error = %error, "Cache sweep read failed");
                        false
                    }
                };
                if stale && backend.remove(&key).is_ok() {
                    report.removed += 1;
                }
            }
        }

        report
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory: self.keys(BackendKind::Memory).len(),
            durable: self.keys(BackendKind::Durable).len(),
            session: self.keys(BackendKind::Session).len(),
        }
    }
}
