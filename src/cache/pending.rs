//! In-flight request registry for deduplication.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::key::CacheKey;
use crate::Result;

/// The shared outcome of one in-flight request.
///
/// Both sides of the result are `Clone`, which is what lets every joined
/// caller receive the same settled value or error.
pub type SharedOutcome = Shared<BoxFuture<'static, Result<Value>>>;

struct PendingEntry {
    outcome: SharedOutcome,
    token: CancellationToken,
    generation: u64,
}

/// Tracks in-flight requests by cache key so concurrent identical calls
/// share one underlying invocation.
///
/// The check-then-register step runs under one synchronous lock with no
/// suspension point, so two racing callers cannot both miss and register.
/// Each registered future unregisters itself when it settles and is driven
/// by a detached task, so cleanup happens even if every caller stops
/// polling early.
pub struct PendingRegistry {
    entries: Mutex<HashMap<String, PendingEntry>>,
    next_generation: AtomicU64,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Join the live in-flight request for `key`, or register the future
    /// produced by `make_future` as the new one.
    ///
    /// An existing entry is joined only while its owning token is alive; a
    /// cancelled entry is dead weight and gets replaced. `token` is the
    /// registering attempt's token and decides liveness for later callers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn join_or_register<F>(
        self: &Arc<Self>,
        key: &CacheKey,
        token: CancellationToken,
        make_future: F,
    ) -> SharedOutcome
    where
        F: FnOnce() -> BoxFuture<'static, Result<Value>>,
    {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key.as_str()) {
            if !entry.token.is_cancelled() {
                debug!(key = %key, operation = %key.operation, "joining in-flight request");
                return entry.outcome.clone();
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::downgrade(self);
        let hash = key.hash.clone();
        let inner = make_future();
        let outcome: SharedOutcome = async move {
            let result = inner.await;
            if let Some(registry) = registry.upgrade() {
                registry.unregister(&hash, generation);
            }
            result
        }
        .boxed()
        .shared();

        entries.insert(
            key.hash.clone(),
            PendingEntry {
                outcome: outcome.clone(),
                token,
                generation,
            },
        );
        drop(entries);

        // Detached driver: the outcome settles and unregisters itself even
        // if every caller is cancelled away from the await.
        tokio::spawn(outcome.clone());
        outcome
    }

    /// Whether a live request is currently registered for `key`.
    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(key.as_str())
            .map(|entry| !entry.token.is_cancelled())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Removes the entry only if it is still the one this settled future
    // registered; a dead entry may already have been replaced.
    fn unregister(&self, hash: &str, generation: u64) {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(hash).map(|e| e.generation) == Some(generation) {
            entries.remove(hash);
        }
    }
}

impl Default for PendingRegistry {
    fn default() -> Self {
        Self::new()
    }
}
