//! Operational commands over a cache store: inspection and housekeeping.

use serde_json::Value;
use tracing::info;

use crate::cache::{
    BackendKind, CacheConfig, CacheStats, ClearScope, KeyValueCache, Lookup, SweepReport,
};
use crate::config::ClearTarget;
use crate::infra::error::InfraError;

use super::error::AppError;

impl From<ClearTarget> for ClearScope {
    fn from(target: ClearTarget) -> Self {
        match target {
            ClearTarget::All => ClearScope::All,
            ClearTarget::Memory => ClearScope::Backend(BackendKind::Memory),
            ClearTarget::Durable => ClearScope::Backend(BackendKind::Durable),
            ClearTarget::Session => ClearScope::Backend(BackendKind::Session),
        }
    }
}

pub struct MaintenanceService {
    cache: KeyValueCache,
}

impl MaintenanceService {
    /// Open the durable store named by `config`.
    pub fn open(config: CacheConfig) -> Result<Self, AppError> {
        let cache = KeyValueCache::open(config).map_err(InfraError::from)?;
        Ok(Self { cache })
    }

    pub fn from_cache(cache: KeyValueCache) -> Self {
        Self { cache }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn sweep(&self) -> SweepReport {
        let report = self.cache.sweep_expired();
        info!(
            scanned = report.scanned,
            removed = report.removed,
            "Cache sweep finished"
        );
        report
    }

    pub fn clear(&self, target: ClearTarget) -> usize {
        self.cache.clear(target.into())
    }

    /// Raw JSON of the live value under `key` in the default backend.
    pub fn get(&self, key: &str) -> Result<Value, AppError> {
        match self.cache.try_lookup::<Value>(key, None)? {
            Lookup::Hit(value) => Ok(value),
            Lookup::Miss | Lookup::Expired | Lookup::VersionMismatch => {
                Err(AppError::NotFound(key.to_string()))
            }
        }
    }

    /// Switch this process to `version` and drop every prefixed entry.
    ///
    /// Returns the number of entries dropped. The version is not stored, so the
    /// next process reads with its configured version again.
    pub fn bump_version(&self, version: &str) -> Result<usize, AppError> {
        let version = version.trim();
        if version.is_empty() {
            return Err(AppError::validation("version must not be empty"));
        }
        let dropped = self.cache.stats().total();
        self.cache.update_version(version);
        Ok(dropped)
    }
}
