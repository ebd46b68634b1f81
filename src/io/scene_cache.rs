//! Two-tier scene-list cache: bounded in-memory LRU over TTL-bounded JSON files

use crate::types::{MonitorError, MonitorResult, SceneRecord};
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persisted scene list with its write time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneCacheEntry {
    pub written_at: DateTime<Utc>,
    pub records: Vec<SceneRecord>,
}

impl SceneCacheEntry {
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.written_at > ttl
    }
}

pub struct SceneCache {
    cache_dir: PathBuf,
    ttl: Duration,
    memory: Mutex<LruCache<String, SceneCacheEntry>>,
}

impl SceneCache {
    pub fn new(cache_dir: PathBuf, ttl: Duration, memory_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(memory_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache_dir,
            ttl,
            memory: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", fingerprint))
    }

    pub fn get(&self, fingerprint: &str) -> Option<Vec<SceneRecord>> {
        self.get_at(fingerprint, Utc::now())
    }

    /// Lookup as of `now`: memory first, then disk; stale entries are evicted
    pub fn get_at(&self, fingerprint: &str, now: DateTime<Utc>) -> Option<Vec<SceneRecord>> {
        if let Some(records) = self.memory_get(fingerprint, now) {
            log::debug!("Scene cache memory hit: {}", fingerprint);
            return Some(records);
        }

        let entry = self.disk_get(fingerprint, now)?;
        log::debug!("Scene cache disk hit: {}", fingerprint);
        let records = entry.records.clone();
        self.memory_put(fingerprint, entry);
        Some(records)
    }

    pub fn put(&self, fingerprint: &str, records: &[SceneRecord]) -> MonitorResult<()> {
        self.put_at(fingerprint, records, Utc::now())
    }

    /// Store in both tiers; a disk failure still leaves the memory entry
    pub fn put_at(
        &self,
        fingerprint: &str,
        records: &[SceneRecord],
        written_at: DateTime<Utc>,
    ) -> MonitorResult<()> {
        let entry = SceneCacheEntry {
            written_at,
            records: records.to_vec(),
        };
        self.memory_put(fingerprint, entry.clone());
        self.disk_put(fingerprint, &entry)
    }

    pub fn memory_len(&self) -> usize {
        self.lock_memory().len()
    }

    pub fn clear_memory(&self) {
        self.lock_memory().clear();
    }

    fn lock_memory(&self) -> std::sync::MutexGuard<'_, LruCache<String, SceneCacheEntry>> {
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn memory_get(&self, fingerprint: &str, now: DateTime<Utc>) -> Option<Vec<SceneRecord>> {
        let mut memory = self.lock_memory();
        let stale = match memory.get(fingerprint) {
            Some(entry) if !entry.is_stale(now, self.ttl) => return Some(entry.records.clone()),
            Some(_) => true,
            None => false,
        };
        if stale {
            memory.pop(fingerprint);
        }
        None
    }

    fn memory_put(&self, fingerprint: &str, entry: SceneCacheEntry) {
        self.lock_memory().put(fingerprint.to_string(), entry);
    }

    fn disk_get(&self, fingerprint: &str, now: DateTime<Utc>) -> Option<SceneCacheEntry> {
        let path = self.entry_path(fingerprint);
        let content = std::fs::read_to_string(&path).ok()?;

        let entry = match serde_json::from_str::<SceneCacheEntry>(&content) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Removing corrupt scene cache {}: {}", path.display(), e);
                Self::remove(&path);
                return None;
            }
        };

        if entry.is_stale(now, self.ttl) {
            log::debug!("Removing stale scene cache {}", path.display());
            Self::remove(&path);
            return None;
        }
        Some(entry)
    }

    fn disk_put(&self, fingerprint: &str, entry: &SceneCacheEntry) -> MonitorResult<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let path = self.entry_path(fingerprint);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
        serde_json::to_writer(&mut tmp, entry)?;
        tmp.flush()?;
        tmp.persist(&path)
            .map_err(|e| MonitorError::CacheIo(format!("persist {}: {}", path.display(), e)))?;
        Ok(())
    }

    fn remove(path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            log::debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}
