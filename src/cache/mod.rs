//! 查询缓存模块：规范化键生成、带 TTL 的存储层以及在途请求去重。
//!
//! # Query Caching Module
//!
//! This module provides the shared caching layer of the runtime: canonical
//! cache keys, a TTL-aware store over pluggable backends, and the registry
//! that deduplicates concurrent identical requests.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheService`] | Owns the store and the pending registry; shared between queries |
//! | [`CacheStore`] | TTL policy layer with hit/miss statistics |
//! | [`CacheBackend`] | Trait for implementing custom storage backends |
//! | [`MemoryStore`] | In-memory backend with capacity-based eviction |
//! | [`NullStore`] | No-op backend for disabling storage |
//! | [`KeyGenerator`] | Canonical cache key derivation from operation + params |
//! | [`PendingRegistry`] | Shares one in-flight outcome across identical requests |
//!
//! ## Cache Key Generation
//!
//! Cache keys are generated from:
//! - The operation identity (a stable name)
//! - The full parameter mapping, serialized with object keys sorted at every
//!   nesting level
//! - An optional salt for namespacing
//!
//! This ensures identical requests map to the same entry regardless of the
//! order in which parameters were inserted, while any structural difference
//! produces a distinct key.
//!
//! ## Expiry Model
//!
//! Entries store a value and the instant it was written; they carry no
//! lifetime of their own. Readers supply their `cache_time` on lookup and the
//! store lazily drops entries that have outlived it. There is no background
//! sweeper task.

mod key;
mod pending;
mod service;
mod store;

pub use key::{CacheKey, KeyGenerator};
pub use pending::{PendingRegistry, SharedOutcome};
pub use service::CacheService;
pub use store::{CacheBackend, CacheStats, CacheStore, MemoryStore, NullStore, StoredEntry};
