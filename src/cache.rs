//! # Two-Tier Cache
//!
//! Memory and disk caches with TTL and capacity-based eviction, used to
//! avoid recomputation in recovery and performance-sensitive paths (OCR
//! output, LLM responses, rendered report fragments).
//!
//! The disk tier keeps a JSON side-index (`cache_index.json`) next to one
//! serialized file per entry. Index persistence is deliberately not
//! transactional: a crash between the entry write and the index write is
//! self-healed on the next read, because an index row whose file is missing
//! or unreadable is treated as a miss and pruned.

use std::collections::HashMap;
use std::fs;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::types::Result;

/// Configuration for the cache tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries held in memory
    pub memory_max_entries: usize,
    /// Maximum cumulative bytes on disk (evicts above 80% of this)
    pub disk_max_bytes: u64,
    /// Default entry TTL in seconds
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_max_entries: 256,
            disk_max_bytes: 50 * 1024 * 1024,
            default_ttl_secs: 3600,
        }
    }
}

impl TryFrom<config::Config> for CacheConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        // Start from defaults and selectively override from the provided config.
        let mut base = CacheConfig::default();
        if let Ok(max_entries) = cfg.get::<usize>("cache.memory_max_entries") {
            base.memory_max_entries = max_entries;
        }
        if let Ok(max_bytes) = cfg.get::<u64>("cache.disk_max_bytes") {
            base.disk_max_bytes = max_bytes;
        }
        if let Ok(ttl) = cfg.get::<u64>("cache.default_ttl_secs") {
            base.default_ttl_secs = ttl;
        }
        Ok(base)
    }
}

#[derive(Debug, Clone)]
struct MemEntry<V> {
    value: V,
    expires_at: Instant,
    last_access: Instant,
}

/// Fixed-capacity in-memory cache with per-entry absolute expiry.
///
/// Expired entries are evicted lazily on `get`; a `set` of a new key at
/// capacity evicts the least-recently-accessed entry (by last-access time,
/// not insertion order).
#[derive(Debug)]
pub struct MemoryCache<V> {
    max_entries: usize,
    default_ttl: Duration,
    entries: RwLock<HashMap<String, MemEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> MemoryCache<V> {
    /// Creates a memory cache with the given capacity and default TTL
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            max_entries,
            default_ttl,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, MemEntry<V>>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Looks up a key; an expired entry counts as absent and is removed
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.write();

        let live = match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_access = now;
                Some(entry.value.clone())
            }
            Some(_) => None, // expired
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("grader.cache.memory.misses", 1);
                return None;
            }
        };

        match live {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("grader.cache.memory.hits", 1);
                Some(value)
            }
            None => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("grader.cache.memory.misses", 1);
                None
            }
        }
    }

    /// Inserts a value, evicting the least-recently-accessed entry when a
    /// new key would exceed capacity
    pub fn set<S: Into<String>>(&self, key: S, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.write();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let lru_key = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone());
            if let Some(lru_key) = lru_key {
                entries.remove(&lru_key);
                counter!("grader.cache.memory.evictions", 1);
            }
        }

        entries.insert(
            key,
            MemEntry {
                value,
                expires_at: now + ttl.unwrap_or(self.default_ttl),
                last_access: now,
            },
        );
    }

    /// Removes a key
    pub fn remove(&self, key: &str) {
        self.write().remove(key);
    }

    /// Empties the cache
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Current entry count, expired entries included until touched
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// True when no entries are held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) since construction
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    filename: String,
    size: u64,
    created: DateTime<Utc>,
    last_access: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

const INDEX_FILENAME: &str = "cache_index.json";

/// Disk-backed cache: one serialized JSON file per entry plus a JSON
/// side-index mapping key to file metadata
#[derive(Debug)]
pub struct DiskCache<V> {
    dir: PathBuf,
    max_bytes: u64,
    default_ttl: Duration,
    index: Mutex<HashMap<String, IndexEntry>>,
    _marker: PhantomData<fn() -> V>,
}

impl<V: Serialize + DeserializeOwned> DiskCache<V> {
    /// Opens (or creates) a disk cache in `dir`, loading any existing index
    pub fn new<P: Into<PathBuf>>(dir: P, max_bytes: u64, default_ttl: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let index_path = dir.join(INDEX_FILENAME);
        let index = match fs::read(&index_path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(index) => index,
                Err(err) => {
                    warn!(error = %err, "Corrupt cache index; starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            dir,
            max_bytes,
            default_ttl,
            index: Mutex::new(index),
            _marker: PhantomData,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, IndexEntry>> {
        self.index
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Best-effort, non-atomic by design; see the module docs.
    fn persist_index(&self, index: &HashMap<String, IndexEntry>) {
        let path = self.dir.join(INDEX_FILENAME);
        match serde_json::to_vec_pretty(index) {
            Ok(bytes) => {
                if let Err(err) = fs::write(&path, bytes) {
                    warn!(error = %err, "Failed to persist cache index");
                }
            }
            Err(err) => warn!(error = %err, "Failed to serialize cache index"),
        }
    }

    /// Looks up a key. Expired, missing, or unreadable entries count as
    /// misses and their index rows are pruned.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut index = self.lock();
        let entry = match index.get(key) {
            Some(entry) => entry.clone(),
            None => {
                counter!("grader.cache.disk.misses", 1);
                return None;
            }
        };

        let path = self.dir.join(&entry.filename);
        if entry.expires_at <= Utc::now() {
            index.remove(key);
            self.persist_index(&index);
            drop(index);
            let _ = fs::remove_file(&path);
            counter!("grader.cache.disk.misses", 1);
            return None;
        }

        let value = fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());
        match value {
            Some(value) => {
                let mut entry = entry;
                entry.last_access = Utc::now();
                index.insert(key.to_string(), entry);
                self.persist_index(&index);
                counter!("grader.cache.disk.hits", 1);
                Some(value)
            }
            None => {
                // Orphaned or partially written file: self-heal
                index.remove(key);
                self.persist_index(&index);
                drop(index);
                let _ = fs::remove_file(&path);
                counter!("grader.cache.disk.misses", 1);
                None
            }
        }
    }

    /// Writes a value, evicting oldest-by-last-access entries while the
    /// cumulative size would exceed 80% of `max_bytes`
    pub fn set(&self, key: &str, value: &V, ttl: Option<Duration>) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let mut index = self.lock();

        self.ensure_space(&mut index, bytes.len() as u64);

        let filename = index
            .get(key)
            .map(|entry| entry.filename.clone())
            .unwrap_or_else(|| format!("{}.json", Uuid::new_v4().simple()));

        // Entry file first, index after; a crash in between self-heals on read.
        fs::write(self.dir.join(&filename), &bytes)?;

        let now = Utc::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        index.insert(
            key.to_string(),
            IndexEntry {
                filename,
                size: bytes.len() as u64,
                created: now,
                last_access: now,
                expires_at: now + ChronoDuration::milliseconds(ttl.as_millis() as i64),
            },
        );
        self.persist_index(&index);
        Ok(())
    }

    fn ensure_space(&self, index: &mut HashMap<String, IndexEntry>, incoming: u64) {
        let threshold = (self.max_bytes as f64 * 0.8) as u64;
        let mut total: u64 = index.values().map(|entry| entry.size).sum();

        while total + incoming > threshold && !index.is_empty() {
            let oldest_key = index
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone());
            match oldest_key {
                Some(key) => {
                    if let Some(entry) = index.remove(&key) {
                        total = total.saturating_sub(entry.size);
                        let _ = fs::remove_file(self.dir.join(&entry.filename));
                        counter!("grader.cache.disk.evictions", 1);
                    }
                }
                None => break,
            }
        }
    }

    /// Removes a key and its entry file
    pub fn remove(&self, key: &str) {
        let mut index = self.lock();
        if let Some(entry) = index.remove(key) {
            let _ = fs::remove_file(self.dir.join(&entry.filename));
            self.persist_index(&index);
        }
    }

    /// Removes every entry and its file
    pub fn clear(&self) {
        let mut index = self.lock();
        for entry in index.values() {
            let _ = fs::remove_file(self.dir.join(&entry.filename));
        }
        index.clear();
        self.persist_index(&index);
    }

    /// Number of indexed entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when the index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Memory-over-disk cache: reads check memory first and promote disk hits;
/// writes populate both tiers
#[derive(Debug)]
pub struct HybridCache<V> {
    memory: MemoryCache<V>,
    disk: DiskCache<V>,
}

impl<V: Clone + Serialize + DeserializeOwned> HybridCache<V> {
    /// Creates a hybrid cache over `dir` with the given configuration
    pub fn new<P: Into<PathBuf>>(dir: P, config: &CacheConfig) -> Result<Self> {
        let default_ttl = Duration::from_secs(config.default_ttl_secs);
        Ok(Self {
            memory: MemoryCache::new(config.memory_max_entries, default_ttl),
            disk: DiskCache::new(dir, config.disk_max_bytes, default_ttl)?,
        })
    }

    /// The memory tier
    pub fn memory(&self) -> &MemoryCache<V> {
        &self.memory
    }

    /// The disk tier
    pub fn disk(&self) -> &DiskCache<V> {
        &self.disk
    }

    /// Reads through both tiers, promoting a disk hit into memory
    pub fn get(&self, key: &str) -> Option<V> {
        if let Some(value) = self.memory.get(key) {
            return Some(value);
        }
        match self.disk.get(key) {
            Some(value) => {
                self.memory.set(key, value.clone(), None);
                Some(value)
            }
            None => None,
        }
    }

    /// Writes to both tiers
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<()> {
        self.disk.set(key, &value, ttl)?;
        self.memory.set(key, value, ttl);
        Ok(())
    }

    /// Empties both tiers
    pub fn clear(&self) {
        self.memory.clear();
        self.disk.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ttl() -> Duration {
        Duration::from_secs(60)
    }

    #[test]
    fn test_memory_lru_eviction() {
        let cache: MemoryCache<i32> = MemoryCache::new(2, ttl());
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.set("c", 3, None);

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_memory_lru_respects_access_recency() {
        let cache: MemoryCache<i32> = MemoryCache::new(2, ttl());
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        // Touch "a" so "b" becomes least recently accessed
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c", 3, None);

        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_memory_ttl_expiry() {
        let cache: MemoryCache<i32> = MemoryCache::new(10, ttl());
        cache.set("k", 9, Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
        // Lazy eviction removed the entry
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_memory_overwrite_does_not_evict() {
        let cache: MemoryCache<i32> = MemoryCache::new(2, ttl());
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.set("a", 10, None);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn test_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache: DiskCache<String> =
            DiskCache::new(dir.path(), 1024 * 1024, ttl()).unwrap();

        cache.set("ocr:page1", &"extracted text".to_string(), None).unwrap();
        assert_eq!(cache.get("ocr:page1"), Some("extracted text".to_string()));
        assert!(dir.path().join(INDEX_FILENAME).exists());
    }

    #[test]
    fn test_disk_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache: DiskCache<i32> =
                DiskCache::new(dir.path(), 1024 * 1024, ttl()).unwrap();
            cache.set("k", &5, None).unwrap();
        }
        let cache: DiskCache<i32> = DiskCache::new(dir.path(), 1024 * 1024, ttl()).unwrap();
        assert_eq!(cache.get("k"), Some(5));
    }

    #[test]
    fn test_disk_orphan_self_heals() {
        let dir = tempfile::tempdir().unwrap();
        let cache: DiskCache<i32> = DiskCache::new(dir.path(), 1024 * 1024, ttl()).unwrap();
        cache.set("k", &5, None).unwrap();

        // Delete the entry file behind the index's back
        for entry in fs::read_dir(dir.path()).unwrap() {
            let path = entry.unwrap().path();
            if path.file_name().map_or(false, |n| n != INDEX_FILENAME) {
                fs::remove_file(path).unwrap();
            }
        }

        assert_eq!(cache.get("k"), None);
        // The stale index row was pruned
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_disk_ensure_space_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        // Tiny budget: 80% threshold forces eviction quickly
        let cache: DiskCache<String> = DiskCache::new(dir.path(), 100, ttl()).unwrap();

        let payload = "x".repeat(30); // ~37 bytes serialized
        cache.set("first", &payload, None).unwrap();
        cache.set("second", &payload, None).unwrap();
        cache.set("third", &payload, None).unwrap();

        // The oldest entry was evicted to stay under 80 bytes
        assert!(cache.get("first").is_none());
        assert!(cache.len() <= 2);
    }

    #[test]
    fn test_disk_ttl_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let cache: DiskCache<i32> = DiskCache::new(dir.path(), 1024 * 1024, ttl()).unwrap();
        cache.set("k", &5, Some(Duration::from_millis(1))).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_hybrid_promotes_disk_hits() {
        let dir = tempfile::tempdir().unwrap();
        let cache: HybridCache<String> =
            HybridCache::new(dir.path(), &CacheConfig::default()).unwrap();

        cache.set("report:7", "rendered".to_string(), None).unwrap();
        // Drop the memory tier copy; the disk copy remains
        cache.memory().clear();
        assert_eq!(cache.memory().len(), 0);

        assert_eq!(cache.get("report:7"), Some("rendered".to_string()));
        // The disk hit was promoted
        assert_eq!(cache.memory().len(), 1);
    }

    #[test]
    fn test_hybrid_clear_empties_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let cache: HybridCache<i32> =
            HybridCache::new(dir.path(), &CacheConfig::default()).unwrap();
        cache.set("k", 1, None).unwrap();
        cache.clear();
        assert_eq!(cache.get("k"), None);
        assert!(cache.disk().is_empty());
    }
}
