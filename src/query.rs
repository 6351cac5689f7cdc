//! Query construction and lifecycle.
//!
//! Developer-friendly goal: keep the public surface small and predictable.
//! Implementation details are split into submodules under `src/query/`.

pub mod abort;
pub mod builder;
pub mod core;
mod execution;
mod mutation;
pub mod observer;
mod polling;
pub mod state;

pub use abort::AbortToken;
pub use builder::QueryBuilder;
pub use core::{Operation, Query};
pub use execution::ExecuteOptions;
pub use mutation::MutateOptions;
pub use observer::QueryObserver;
pub use state::{QueryState, QueryStatus};
