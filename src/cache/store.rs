//! Cache storage: backend trait, built-in backends and the TTL policy layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::key::CacheKey;
use crate::Result;

/// A cached value plus the instant it was written.
///
/// Entries carry no lifetime of their own; freshness and expiry are judged
/// by readers against their configured windows.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub value: Value,
    pub stored_at: Instant,
}

impl StoredEntry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }
}

/// Storage seam for cached entries.
///
/// Backends store entries verbatim; expiry policy lives in [`CacheStore`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<StoredEntry>>;
    async fn set(&self, key: &CacheKey, entry: StoredEntry) -> Result<()>;
    async fn remove(&self, key: &CacheKey) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
    async fn len(&self) -> Result<usize>;
    fn name(&self) -> &'static str;
}

struct Slot {
    entry: StoredEntry,
    last_accessed: Instant,
}

/// In-memory backend bounded by entry count.
///
/// When full, inserts drop the least recently accessed entry first.
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Slot>>>,
    max_entries: usize,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries: max_entries.max(1),
        }
    }

    fn evict_if_needed(&self, entries: &mut HashMap<String, Slot>) {
        while entries.len() >= self.max_entries {
            let coldest = entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_accessed)
                .map(|(k, _)| k.clone());
            match coldest {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl CacheBackend for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<StoredEntry>> {
        let mut entries = self.entries.write().unwrap();
        if let Some(slot) = entries.get_mut(&key.hash) {
            slot.last_accessed = Instant::now();
            return Ok(Some(slot.entry.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, entry: StoredEntry) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        if !entries.contains_key(&key.hash) {
            self.evict_if_needed(&mut entries);
        }
        entries.insert(
            key.hash.clone(),
            Slot {
                entry,
                last_accessed: Instant::now(),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.write().unwrap().remove(&key.hash).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().unwrap().clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().unwrap().len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Backend that stores nothing, for disabling persistence entirely.
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullStore {
    async fn get(&self, _: &CacheKey) -> Result<Option<StoredEntry>> {
        Ok(None)
    }
    async fn set(&self, _: &CacheKey, _: StoredEntry) -> Result<()> {
        Ok(())
    }
    async fn remove(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
    fn name(&self) -> &'static str {
        "null"
    }
}

/// Cache access counters, captured with [`CacheStore::stats`].
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// TTL policy layer over a [`CacheBackend`].
///
/// The reader supplies its `cache_time` on every lookup; entries that have
/// outlived it are removed on that read. No background sweeper runs.
pub struct CacheStore {
    backend: Box<dyn CacheBackend>,
    stats: Arc<AtomicStats>,
}

impl CacheStore {
    pub fn new(backend: Box<dyn CacheBackend>) -> Self {
        Self {
            backend,
            stats: Arc::new(AtomicStats::new()),
        }
    }

    pub fn in_memory(max_entries: usize) -> Self {
        Self::new(Box::new(MemoryStore::new(max_entries)))
    }

    /// Look up an entry that is still within `cache_time` of being written.
    ///
    /// An entry that has outlived the reader's window is removed and counts
    /// as a miss. `cache_time` of zero never matches.
    pub async fn get(&self, key: &CacheKey, cache_time: Duration) -> Result<Option<StoredEntry>> {
        let Some(entry) = self.backend.get(key).await? else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        if cache_time.is_zero() || entry.age() >= cache_time {
            self.backend.remove(key).await?;
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, operation = %key.operation, age_ms = entry.age().as_millis() as u64, "cache entry expired");
            return Ok(None);
        }
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(entry))
    }

    pub async fn set(&self, key: &CacheKey, value: Value) -> Result<()> {
        self.backend.set(key, StoredEntry::new(value)).await?;
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let removed = self.backend.remove(key).await?;
        if removed {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }

    pub async fn len(&self) -> Result<usize> {
        self.backend.len().await
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::in_memory(1024)
    }
}
