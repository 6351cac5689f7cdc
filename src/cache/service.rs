//! Shared cache service.

use std::sync::Arc;

use super::key::CacheKey;
use super::pending::PendingRegistry;
use super::store::{CacheBackend, CacheStats, CacheStore};
use crate::Result;

/// Owns the cache store and the pending-request registry.
///
/// There is no global cache: a `CacheService` is constructed explicitly and
/// its lifetime belongs to whoever built it. Queries that should share
/// entries and deduplicate against each other are handed the same service
/// via `Arc`; a query built without one gets a private instance.
///
/// ```rust
/// use std::sync::Arc;
/// use query_runtime::cache::CacheService;
///
/// let shared = Arc::new(CacheService::new());
/// ```
pub struct CacheService {
    store: CacheStore,
    pending: Arc<PendingRegistry>,
}

impl CacheService {
    pub fn new() -> Self {
        Self {
            store: CacheStore::default(),
            pending: Arc::new(PendingRegistry::new()),
        }
    }

    /// Use a custom storage backend instead of the in-memory default.
    pub fn with_backend(backend: Box<dyn CacheBackend>) -> Self {
        Self {
            store: CacheStore::new(backend),
            pending: Arc::new(PendingRegistry::new()),
        }
    }

    /// Bound the in-memory backend at `max_entries`.
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            store: CacheStore::in_memory(max_entries),
            pending: Arc::new(PendingRegistry::new()),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn pending(&self) -> &Arc<PendingRegistry> {
        &self.pending
    }

    /// Drop the entry for one key, forcing the next execution to fetch.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        self.store.invalidate(key).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }
}

impl Default for CacheService {
    fn default() -> Self {
        Self::new()
    }
}
