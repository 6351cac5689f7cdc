//! Direct writes to query data, with optional revalidation and rollback.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use super::core::{Query, QueryInner};
use super::execution::{execute_inner, ExecuteOptions};
use super::state::QueryStatus;
use crate::Error;
use crate::Result;

/// How a mutation applies its value.
#[derive(Debug, Clone)]
pub struct MutateOptions {
    /// Write the value into visible state before any revalidation settles.
    pub optimistic: bool,
    /// Re-execute the operation (cache-bypassing, never deduplicated)
    /// after applying the value.
    pub revalidate: bool,
    /// Restore the pre-mutation value when an optimistic revalidation
    /// fails.
    pub rollback_on_error: bool,
}

impl Default for MutateOptions {
    fn default() -> Self {
        Self {
            optimistic: false,
            revalidate: false,
            rollback_on_error: true,
        }
    }
}

impl<T> Query<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Write `value` straight into visible state and the cache.
    ///
    /// No operation is invoked; the query moves to `Success` as if `value`
    /// had just been fetched.
    pub async fn mutate(&self, value: T) -> Result<()> {
        self.mutate_with(value, MutateOptions::default()).await
    }

    /// Mutate with explicit control over optimism, revalidation and
    /// rollback.
    pub async fn mutate_with(&self, value: T, options: MutateOptions) -> Result<()> {
        mutate_inner(&self.inner, value, options).await
    }
}

pub(crate) async fn mutate_inner<T>(
    inner: &Arc<QueryInner<T>>,
    value: T,
    options: MutateOptions,
) -> Result<()>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    if inner.state.is_closed() {
        return Err(Error::TornDown);
    }

    let previous = inner.state.snapshot().data;

    // Without revalidation the write is the whole mutation; with it, the
    // optimistic flag decides whether the value shows before the fetch
    // settles.
    if options.optimistic || !options.revalidate {
        inner.state.mutate(|state| {
            state.status = QueryStatus::Success;
            state.data = Some(value.clone());
            state.error = None;
            state.fetched_at = Some(Instant::now());
        });
    }

    if options.revalidate {
        let exec = ExecuteOptions {
            ignore_cache: true,
            ..ExecuteOptions::default()
        }
        .deduplicate(false);
        match execute_inner(inner, exec).await {
            Ok(_) => Ok(()),
            Err(err) => {
                if options.optimistic && options.rollback_on_error {
                    debug!(operation = %inner.operation_name, "revalidation failed, rolling back mutation");
                    inner.state.mutate(|state| {
                        state.data = previous.clone();
                    });
                }
                Err(err)
            }
        }
    } else {
        // Sibling queries on the same key should observe the mutated value,
        // so it goes through the store under the current key.
        if !inner.config.cache_time.is_zero() {
            let key = inner.current_key()?;
            let json = serde_json::to_value(&value)?;
            inner.cache.store().set(&key, json).await?;
        }
        Ok(())
    }
}
