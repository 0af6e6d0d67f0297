//! TTL key-value cache backing the lock registry.
//!
//! A key's existence means "an operation of this scope is in flight". Entries
//! are never compared against a holder identity: setting an existing key
//! simply extends it.

use crate::{fsync_dir, StoreError};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

pub trait LockCache: Send + Sync {
    fn name(&self) -> &'static str;
    fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
    fn exists(&self, key: &str) -> Result<bool, StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local cache. Suitable for tests and single-process use.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Instant>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::LockFailed("lock cache mutex poisoned".to_owned())
}

impl LockCache for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let expiry = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| StoreError::InvalidTtl(format!("{ttl:?}")))?;
        self.entries
            .lock()
            .map_err(poisoned)?
            .insert(key.to_owned(), expiry);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        match entries.get(key) {
            Some(expiry) if *expiry > Instant::now() => Ok(true),
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().map_err(poisoned)?.remove(key);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    key: String,
    expires_at: DateTime<Utc>,
}

/// Cache shared by every process using the same store: one file per key.
///
/// File names are the blake3 hash of the key so arbitrary key text stays
/// path-safe.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(blake3::hash(key.as_bytes()).to_hex().as_str())
    }

    fn read_entry(&self, path: &Path) -> Result<Option<FileEntry>, StoreError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'))
            {
                continue;
            }
            match self.read_entry(&path) {
                Ok(Some(e)) if e.expires_at <= now => {
                    remove_if_present(&path)?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("unreadable lock entry {}: {e}", path.display());
                }
            }
        }
        Ok(removed)
    }
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl LockCache for FileCache {
    fn name(&self) -> &'static str {
        "file"
    }

    fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let ttl = TimeDelta::from_std(ttl).map_err(|e| StoreError::InvalidTtl(e.to_string()))?;
        let entry = FileEntry {
            key: key.to_owned(),
            expires_at: Utc::now() + ttl,
        };
        let content = serde_json::to_string(&entry)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(key))
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&self.dir)?;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.entry_path(key);
        match self.read_entry(&path)? {
            Some(entry) if entry.expires_at > Utc::now() => Ok(true),
            Some(_) => {
                remove_if_present(&path)?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        remove_if_present(&self.entry_path(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn caches() -> (tempfile::TempDir, Vec<Box<dyn LockCache>>) {
        let dir = tempfile::tempdir().unwrap();
        let file = FileCache::new(dir.path().join("locks")).unwrap();
        (dir, vec![Box::new(MemoryCache::new()), Box::new(file)])
    }

    #[test]
    fn set_exists_delete() {
        let (_dir, caches) = caches();
        for cache in &caches {
            assert!(!cache.exists("k").unwrap(), "{}", cache.name());
            cache.set_with_ttl("k", Duration::from_secs(60)).unwrap();
            assert!(cache.exists("k").unwrap(), "{}", cache.name());
            cache.delete("k").unwrap();
            assert!(!cache.exists("k").unwrap(), "{}", cache.name());
        }
    }

    #[test]
    fn delete_missing_key_is_ok() {
        let (_dir, caches) = caches();
        for cache in &caches {
            cache.delete("never-set").unwrap();
        }
    }

    #[test]
    fn entries_expire() {
        let (_dir, caches) = caches();
        for cache in &caches {
            cache.set_with_ttl("short", Duration::from_millis(20)).unwrap();
            std::thread::sleep(Duration::from_millis(60));
            assert!(!cache.exists("short").unwrap(), "{}", cache.name());
        }
    }

    #[test]
    fn setting_again_extends_ttl() {
        let (_dir, caches) = caches();
        for cache in &caches {
            cache.set_with_ttl("k", Duration::from_millis(20)).unwrap();
            cache.set_with_ttl("k", Duration::from_secs(60)).unwrap();
            std::thread::sleep(Duration::from_millis(60));
            assert!(cache.exists("k").unwrap(), "{}", cache.name());
        }
    }

    #[test]
    fn file_cache_is_shared_between_handles() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileCache::new(dir.path()).unwrap();
        let b = FileCache::new(dir.path()).unwrap();
        a.set_with_ttl("waldo", Duration::from_secs(60)).unwrap();
        assert!(b.exists("waldo").unwrap());
        b.delete("waldo").unwrap();
        assert!(!a.exists("waldo").unwrap());
    }

    #[test]
    fn file_cache_keys_with_slashes_are_path_safe() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        cache
            .set_with_ttl("../../etc/passwd", Duration::from_secs(60))
            .unwrap();
        assert!(cache.exists("../../etc/passwd").unwrap());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn corrupt_file_entry_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        fs::write(cache.entry_path("bad"), "not json").unwrap();
        assert!(cache.exists("bad").is_err());
    }

    #[test]
    fn purge_removes_only_expired() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        cache.set_with_ttl("old", Duration::from_millis(10)).unwrap();
        cache.set_with_ttl("live", Duration::from_secs(60)).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert!(cache.exists("live").unwrap());
    }

    #[test]
    fn memory_cache_is_thread_safe() {
        let cache = Arc::new(MemoryCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache
                        .set_with_ttl(&format!("k{i}"), Duration::from_secs(60))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for i in 0..8 {
            assert!(cache.exists(&format!("k{i}")).unwrap());
        }
    }
}
