//! Storage backends behind the key/value cache.
//!
//! All three stores speak the same serialized-blob interface so the cache can
//! select one per call without special cases:
//!
//! - [`MemoryStore`]: volatile, process-local, unbounded.
//! - [`DurableStore`]: one file per key in a directory, survives restarts, byte quota.
//! - [`SessionStore`]: in-memory, byte quota, dropped wholesale by [`SessionStore::end_session`].

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::Deserialize;
use tracing::{debug, warn};

use super::error::StorageError;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::backend";
const DURABLE_FILE_EXT: &str = "json";
const STAGING_FILE_EXT: &str = "tmp";

/// Identifies one of the physical stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Durable,
    Session,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [Self::Memory, Self::Durable, Self::Session];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Durable => "durable",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform serialized key/value interface shared by every backend.
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Read the blob stored under `key`, if any.
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `blob` under `key`, replacing any previous value.
    ///
    /// Fails on quota exhaustion or I/O errors; the previous value is left intact.
    fn write(&self, key: &str, blob: String) -> Result<(), StorageError>;

    /// Remove `key`. Removing a missing key succeeds.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// List every stored key starting with `prefix`.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

fn blob_cost(key: &str, blob: &str) -> u64 {
    (key.len() + blob.len()) as u64
}

fn check_quota(used: u64, requested: u64, limit: Option<u64>) -> Result<(), StorageError> {
    match limit {
        Some(limit) if used + requested > limit => Err(StorageError::QuotaExceeded {
            used,
            requested,
            limit,
        }),
        _ => Ok(()),
    }
}

// ============================================================================
// In-memory stores
// ============================================================================

struct MapStore {
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: Option<u64>,
}

impl MapStore {
    fn new(quota_bytes: Option<u64>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota_bytes,
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        rw_read(&self.entries, SOURCE, "map.read").get(key).cloned()
    }

    fn write(&self, key: &str, blob: String) -> Result<(), StorageError> {
        let mut entries = rw_write(&self.entries, SOURCE, "map.write");
        if self.quota_bytes.is_some() {
            let used: u64 = entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(existing, value)| blob_cost(existing, value))
                .sum();
            check_quota(used, blob_cost(key, &blob), self.quota_bytes)?;
        }
        entries.insert(key.to_string(), blob);
        Ok(())
    }

    fn remove(&self, key: &str) {
        rw_write(&self.entries, SOURCE, "map.remove").remove(key);
    }

    fn list_keys(&self, prefix: &str) -> Vec<String> {
        rw_read(&self.entries, SOURCE, "map.list_keys")
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn clear(&self) {
        rw_write(&self.entries, SOURCE, "map.clear").clear();
    }
}

/// Volatile process-local store.
pub struct MemoryStore {
    inner: MapStore,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: MapStore::new(None),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.inner.read(key))
    }

    fn write(&self, key: &str, blob: String) -> Result<(), StorageError> {
        self.inner.write(key, blob)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key);
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self.inner.list_keys(prefix))
    }
}

/// Session-scoped store with a byte quota.
pub struct SessionStore {
    inner: MapStore,
}

impl SessionStore {
    pub fn new(quota_bytes: u64) -> Self {
        Self {
            inner: MapStore::new(Some(quota_bytes)),
        }
    }

    /// Drop everything stored during this session, including foreign keys.
    pub fn end_session(&self) {
        self.inner.clear();
    }
}

impl StorageBackend for SessionStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Session
    }

    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.inner.read(key))
    }

    fn write(&self, key: &str, blob: String) -> Result<(), StorageError> {
        self.inner.write(key, blob)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key);
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self.inner.list_keys(prefix))
    }
}

// ============================================================================
// Durable store
// ============================================================================

/// File-backed store: one file per key, named by the hex encoding of the key.
pub struct DurableStore {
    dir: PathBuf,
    quota_bytes: u64,
}

impl DurableStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, quota_bytes: u64) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let store = Self { dir, quota_bytes };
        store.remove_stale_staging()?;
        Ok(store)
    }

    /// Staging files left by an interrupted write are never counted or listed.
    fn remove_stale_staging(&self) -> Result<(), StorageError> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(STAGING_FILE_EXT) {
                debug!(path = %path.display(), "Removing stale durable staging file");
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{DURABLE_FILE_EXT}", hex::encode(key.as_bytes())))
    }

    fn key_for(path: &Path) -> Option<String> {
        if path.extension()?.to_str()? != DURABLE_FILE_EXT {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let raw = hex::decode(stem).ok()?;
        String::from_utf8(raw).ok()
    }

    /// Bytes used by every key except `skip`.
    fn used_bytes(&self, skip: &str) -> Result<u64, StorageError> {
        let mut used = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Some(key) = Self::key_for(&entry.path()) else {
                continue;
            };
            if key == skip {
                continue;
            }
            used += key.len() as u64 + entry.metadata()?.len();
        }
        Ok(used)
    }
}

impl StorageBackend for DurableStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Durable
    }

    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, key: &str, blob: String) -> Result<(), StorageError> {
        check_quota(
            self.used_bytes(key)?,
            blob_cost(key, &blob),
            Some(self.quota_bytes),
        )?;

        let target = self.path_for(key);
        let staging = target.with_extension(STAGING_FILE_EXT);
        let staged = fs::File::create(&staging).and_then(|mut file| {
            file.write_all(blob.as_bytes())?;
            file.sync_all()?;
            fs::rename(&staging, &target)
        });
        if let Err(err) = staged {
            if let Err(cleanup) = fs::remove_file(&staging)
                && cleanup.kind() != ErrorKind::NotFound
            {
                warn!(
                    path = %staging.display(),
                    error = %cleanup,
                    "Failed to remove durable staging file"
                );
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            if let Some(key) = Self::key_for(&entry?.path())
                && key.starts_with(prefix)
            {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn exercise(store: &dyn StorageBackend) {
        assert_eq!(store.read("cache_a").expect("read"), None);

        store.write("cache_a", "1".to_string()).expect("write a");
        store.write("cache_b", "2".to_string()).expect("write b");
        store.write("other", "3".to_string()).expect("write other");
        store.write("cache_a", "4".to_string()).expect("overwrite a");

        assert_eq!(store.read("cache_a").expect("read"), Some("4".to_string()));

        let mut keys = store.list_keys("cache_").expect("list");
        keys.sort();
        assert_eq!(keys, vec!["cache_a".to_string(), "cache_b".to_string()]);

        store.remove("cache_a").expect("remove");
        store.remove("cache_a").expect("remove twice");
        assert_eq!(store.read("cache_a").expect("read"), None);
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn session_store_contract() {
        exercise(&SessionStore::new(1024));
    }

    #[test]
    fn durable_store_contract() {
        let dir = tempfile::tempdir().expect("tempdir");
        exercise(&DurableStore::open(dir.path(), 1024).expect("open"));
    }

    #[test]
    fn session_quota_rejects_without_clobbering() {
        let store = SessionStore::new(16);
        store.write("k", "0123456789".to_string()).expect("fits");

        let err = store
            .write("j", "0123456789".to_string())
            .expect_err("over quota");
        assert!(err.is_quota());

        // Replacing an existing key only counts the new value.
        store.write("k", "abcdefghij".to_string()).expect("replace fits");
        assert_eq!(store.read("k").expect("read"), Some("abcdefghij".to_string()));
        assert_eq!(store.read("j").expect("read"), None);
    }

    #[test]
    fn durable_quota_rejects_oversize_blob() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DurableStore::open(dir.path(), 8).expect("open");

        let err = store
            .write("cache_big", "x".repeat(64))
            .expect_err("over quota");
        assert!(err.is_quota());
        assert!(store.list_keys("").expect("list").is_empty());
    }

    #[test]
    fn durable_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = DurableStore::open(dir.path(), 1024).expect("open");
            store
                .write("cache_menu/items", "[1,2,3]".to_string())
                .expect("write");
        }

        let reopened = DurableStore::open(dir.path(), 1024).expect("reopen");
        assert_eq!(
            reopened.read("cache_menu/items").expect("read"),
            Some("[1,2,3]".to_string())
        );
        assert_eq!(
            reopened.list_keys("cache_").expect("list"),
            vec!["cache_menu/items".to_string()]
        );
    }

    fn staging_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("dir entry").path())
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(STAGING_FILE_EXT))
            .collect()
    }

    #[test]
    fn failed_durable_write_leaves_no_staging_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DurableStore::open(dir.path(), 1024 * 1024).expect("open");
        // A directory in place of the target file makes the final rename fail.
        fs::create_dir(store.path_for("cache_menu")).expect("blocking dir");

        let err = store
            .write("cache_menu", "[1,2,3]".to_string())
            .expect_err("rename onto a directory");
        assert!(matches!(err, StorageError::Io(_)));
        assert!(staging_files(dir.path()).is_empty());
    }

    #[test]
    fn open_removes_interrupted_staging_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let leftover = dir.path().join(format!("{}.tmp", hex::encode("cache_menu")));
        fs::write(&leftover, "[1,2").expect("leftover");

        let store = DurableStore::open(dir.path(), 1024).expect("open");

        assert!(staging_files(dir.path()).is_empty());
        assert!(store.list_keys("").expect("list").is_empty());
    }

    #[test]
    fn end_session_drops_all_keys() {
        let store = SessionStore::new(1024);
        store.write("cache_a", "1".to_string()).expect("write");
        store.write("foreign", "2".to_string()).expect("write");

        store.end_session();

        assert!(store.list_keys("").expect("list").is_empty());
    }

    #[test]
    fn memory_store_recovers_from_poisoned_lock() {
        let store = MemoryStore::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .inner
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store.write("cache_a", "1".to_string()).expect("write");
        assert_eq!(store.read("cache_a").expect("read"), Some("1".to_string()));
    }
}
