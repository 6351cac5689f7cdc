//! # query-runtime
//!
//! 异步数据获取与缓存运行时：统一的缓存、去重、重试、轮询与可取消执行。
//!
//! An asynchronous data-fetching and caching runtime that wraps arbitrary
//! async operations with stale-while-revalidate caching, request
//! deduplication, bounded retry, cooperative cancellation and polling.
//!
//! ## Overview
//!
//! This library sits between application code and whatever actually fetches
//! the data. You hand it an async operation; it hands back a [`Query`] whose
//! executions are cached, deduplicated against identical concurrent calls,
//! retried on failure, superseded by newer calls, and observable through a
//! plain state machine (`Idle` / `Loading` / `Success` / `Error`).
//!
//! ## Core Philosophy
//!
//! - **Transport-agnostic**: the runtime never sees a wire protocol, only an
//!   async operation returning a serializable value
//! - **Explicit ownership**: no global cache; a [`CacheService`] is built by
//!   the caller and shared deliberately via `Arc`
//! - **Cooperative cancellation**: attempts receive an [`AbortToken`] and are
//!   expected to observe it; the runtime stops acting on stale results but
//!   never force-kills work
//! - **One writer per query**: only the most recently started execution may
//!   touch visible state, enforced by attempt generations
//!
//! ## Key Features
//!
//! - **Canonical cache keys**: parameter maps hash identically regardless of
//!   insertion order, via [`cache::KeyGenerator`]
//! - **TTL caching**: `cache_time` bounds entry lifetime, `stale_time` bounds
//!   how long entries are served without a fetch
//! - **Deduplication**: concurrent identical requests share one in-flight
//!   outcome via [`cache::PendingRegistry`]
//! - **Retry**: bounded attempts with fixed or exponential delay via
//!   [`RetryPolicy`]
//! - **Polling**: silent interval re-execution with an optional failure
//!   threshold
//! - **Mutation**: optimistic writes with rollback via [`MutateOptions`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use query_runtime::{Query, QueryParams};
//!
//! #[tokio::main]
//! async fn main() -> query_runtime::Result<()> {
//!     let user = Query::<serde_json::Value>::builder("fetch_user", |params: QueryParams, _abort| async move {
//!         // Any async work goes here: HTTP, database, file system...
//!         Ok(serde_json::json!({ "id": params["id"], "name": "Ada" }))
//!     })
//!     .params(serde_json::json!({ "id": 1 }))
//!     .cache_time(Duration::from_secs(60))
//!     .retry_count(2)
//!     .build()?;
//!
//!     let data = user.execute().await?;
//!     println!("fetched: {data}");
//!
//!     // A second call inside the cache window is served without fetching.
//!     let cached = user.execute().await?;
//!     assert_eq!(data, cached);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`query`] | Query handle, builder, execution, polling and mutation |
//! | [`cache`] | Canonical keys, TTL store, backends, dedup registry |
//! | [`retry`] | Retry policy and backoff decisions |
//! | [`error`] | Unified error and abort taxonomy |

pub mod cache;
pub mod query;
pub mod retry;

// Re-export main types for convenience
pub use cache::{CacheKey, CacheService, CacheStats};
pub use query::{
    AbortToken, ExecuteOptions, MutateOptions, Operation, Query, QueryBuilder, QueryObserver,
    QueryState, QueryStatus,
};
pub use retry::{RetryDecision, RetryPolicy};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Parameter mapping handed to wrapped operations (a JSON object).
pub type QueryParams = serde_json::Map<String, serde_json::Value>;

/// Error type for the library
pub mod error;
pub use error::{AbortReason, Error, ErrorContext};
