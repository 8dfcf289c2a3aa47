//! Key-value storage tiers.
//!
//! The host offers two tiers: a sync tier holding the settings document and
//! the language preference, and a local tier that only ever held the legacy
//! runtime-state document. Both are modelled by [`StorageArea`].

use anyhow::{Context, Result};
use fs2::FileExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tempfile::NamedTempFile;

use crate::constants::APP_NAME;

/// A JSON key-value storage tier.
pub trait StorageArea: Send + Sync {
    /// Read the value stored under `key`, `None` when absent.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Replace the value stored under `key`.
    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Delete `key`. Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process storage tier with fault injection.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Value>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    silent_drops: AtomicU32,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `get` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `set` and `remove` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Accept the next `count` writes without storing them.
    pub fn drop_next_writes(&self, count: u32) {
        self.silent_drops.store(count, Ordering::SeqCst);
    }

    /// Number of `set` calls received, including failed and dropped ones.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Direct access for tests and diagnostics, bypassing fault injection.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Seed a value, bypassing fault injection.
    pub fn insert(&self, key: &str, value: Value) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }
}

impl StorageArea for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("storage read of '{key}' failed");
        }
        Ok(self.peek(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("storage write of '{key}' failed");
        }
        let dropped = self
            .silent_drops
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !dropped {
            self.insert(key, value);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("storage removal of '{key}' failed");
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Storage tier backed by one JSON file per key.
///
/// Writes go through a temporary file that is atomically renamed into place,
/// with an exclusive `fs2` lock on `.lock` held across the rename so two
/// processes never interleave.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage under `$XDG_STATE_HOME/dogtor/<tier>`.
    pub fn in_state_dir(tier: &str) -> Result<Self> {
        let base = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .context("Could not determine a state directory")?;
        Ok(Self::new(base.join(APP_NAME).join(tier)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{file_name}.json"))
    }

    fn lock(&self) -> Result<File> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;
        let lock_path = self.root.join(".lock");
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open {}", lock_path.display()))?;
        lock_file
            .lock_exclusive()
            .with_context(|| format!("Failed to lock {}", lock_path.display()))?;
        Ok(lock_file)
    }
}

impl StorageArea for FileStorage {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(value))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let path = self.path_for(key);
        let lock = self.lock()?;

        let data = serde_json::to_vec_pretty(&value)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&data)?;
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let _ = lock.unlock();
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        let lock = self.lock()?;
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {}", path.display()));
            }
        }
        let _ = lock.unlock();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_memory_storage_roundtrip_and_remove() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("missing").unwrap(), None);
        storage.set("k", json!({"a": 1})).unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(json!({"a": 1})));
        storage.remove("k").unwrap();
        storage.remove("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
    }

    #[test]
    fn test_memory_storage_silent_drop() {
        let storage = MemoryStorage::new();
        storage.drop_next_writes(1);
        storage.set("k", json!(1)).unwrap();
        assert_eq!(storage.peek("k"), None);
        storage.set("k", json!(2)).unwrap();
        assert_eq!(storage.peek("k"), Some(json!(2)));
        assert_eq!(storage.write_count(), 2);
    }

    #[test]
    fn test_memory_storage_failures() {
        let storage = MemoryStorage::new();
        storage.fail_writes(true);
        assert!(storage.set("k", json!(1)).is_err());
        assert!(storage.remove("k").is_err());
        storage.fail_reads(true);
        assert!(storage.get("k").is_err());
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("sync"));

        assert_eq!(storage.get("user_settings").unwrap(), None);
        storage
            .set("user_settings", json!({"enabled": true}))
            .unwrap();
        assert!(dir.path().join("sync/user_settings.json").exists());
        assert_eq!(
            storage.get("user_settings").unwrap(),
            Some(json!({"enabled": true}))
        );

        storage.remove("user_settings").unwrap();
        storage.remove("user_settings").unwrap();
        assert_eq!(storage.get("user_settings").unwrap(), None);
    }

    #[test]
    fn test_file_storage_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("user_settings.json"), "{not json").unwrap();
        let storage = FileStorage::new(dir.path());
        assert!(storage.get("user_settings").is_err());
    }

    #[test]
    fn test_file_storage_sanitizes_keys() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.set("../escape", json!(1)).unwrap();
        assert!(dir.path().join("___escape.json").exists());
    }
}
