//! Execution flow: cache probe, deduplication, retry loop, guarded writes.
//!
//! One call moves through the stages in a fixed order: merge params and
//! derive the key, supersede the previous attempt, probe the cache, go
//! visible as `Loading`, then await the shared outcome racing against this
//! attempt's own token. Everything that happens after the await is guarded
//! by teardown and generation checks so a stale attempt can never write
//! current state.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::abort::{AbortCoordinator, AbortToken};
use super::core::{to_params, Operation, Query, QueryInner};
use super::state::StateCell;
use crate::cache::{CacheKey, CacheService, SharedOutcome};
use crate::error::Error;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::{QueryParams, Result};

/// Per-call adjustments to the execution flow.
#[derive(Debug, Default)]
pub struct ExecuteOptions {
    /// Extra parameters merged over the instance params, this call only.
    pub params_override: Option<QueryParams>,
    /// Skip the cache probe and always invoke the operation.
    pub ignore_cache: bool,
    /// Suppress `Loading`/`Error` transitions. Callbacks still fire.
    pub silent: bool,
    /// Per-call override of the configured deduplication setting.
    pub deduplicate: Option<bool>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `params` over the instance params for this call.
    pub fn params(mut self, params: impl Serialize) -> Result<Self> {
        self.params_override = Some(to_params(params)?);
        Ok(self)
    }

    pub fn ignore_cache(mut self, ignore: bool) -> Self {
        self.ignore_cache = ignore;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = Some(deduplicate);
        self
    }
}

impl<T> Query<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Execute the wrapped operation with the instance parameters.
    ///
    /// Serves from cache when a fresh entry exists, joins an identical
    /// in-flight request when deduplication allows, and otherwise invokes
    /// the operation under the retry policy. Starting a new call supersedes
    /// the previous in-flight one.
    pub async fn execute(&self) -> Result<T> {
        self.execute_with(ExecuteOptions::default()).await
    }

    /// Execute with extra parameters merged over the instance params.
    pub async fn execute_params(&self, params: impl Serialize) -> Result<T> {
        let options = ExecuteOptions::new().params(params)?;
        self.execute_with(options).await
    }

    /// Execute with full per-call control.
    ///
    /// Parameter and key derivation failures fail the call fast without
    /// touching visible state. When this call joins a request registered by
    /// another query, the registering query's retry policy and write-through
    /// settings govern the shared attempt.
    pub async fn execute_with(&self, options: ExecuteOptions) -> Result<T> {
        execute_inner(&self.inner, options).await
    }
}

/// Full execution flow. `on_finally` fires exactly once per call, whatever
/// the branch, including after teardown.
pub(crate) async fn execute_inner<T>(
    inner: &Arc<QueryInner<T>>,
    options: ExecuteOptions,
) -> Result<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let result = run(inner, options).await;
    inner.state.emit_finally();
    result
}

async fn run<T>(inner: &Arc<QueryInner<T>>, options: ExecuteOptions) -> Result<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    if inner.state.is_closed() {
        return Err(Error::TornDown);
    }

    let params = inner.merged_params(options.params_override.as_ref());
    let key = inner.keys.generate(&inner.operation_name, &params)?;
    *inner.last_params.lock().unwrap() = Some(params.clone());

    // An identical call still in flight is joined when outcome sharing is
    // allowed; any other in-flight call is superseded here and now.
    let deduplicate = options.deduplicate.unwrap_or(inner.config.deduplicate);
    let joinable = if deduplicate {
        inner.abort.current_for(key.as_str())
    } else {
        None
    };
    let (token, generation) = match joinable {
        Some(current) => current,
        None => inner.abort.begin_attempt(key.as_str()),
    };

    let mut stale_seed: Option<(T, Instant)> = None;
    if !options.ignore_cache && !inner.config.cache_time.is_zero() {
        if let Some(entry) = inner
            .cache
            .store()
            .get(&key, inner.config.cache_time)
            .await?
        {
            let age = entry.age();
            let stored_at = entry.stored_at;
            match serde_json::from_value::<T>(entry.value) {
                Ok(data) if is_fresh(age, inner.config.stale_time) => {
                    debug!(key = %key, operation = %inner.operation_name, age_ms = age.as_millis() as u64, "serving fresh cache entry");
                    inner.state.to_success(data.clone(), stored_at);
                    inner.state.emit_success(&data);
                    return Ok(data);
                }
                Ok(data) => stale_seed = Some((data, stored_at)),
                Err(err) => {
                    // A value another query wrote with an incompatible shape;
                    // treat as a miss and fetch.
                    debug!(key = %key, error = %err, "cached value does not deserialize");
                }
            }
        }
    }

    if !options.silent {
        inner.state.to_loading(inner.config.keep_previous_data);
    }
    if let Some((data, stored_at)) = stale_seed {
        inner.state.mutate(|state| {
            if state.data.is_none() {
                state.data = Some(data);
                state.fetched_at = Some(stored_at);
            }
        });
    }

    let attempt = AttemptContext {
        operation: Arc::clone(&inner.operation),
        retry: inner.retry.clone(),
        cache: Arc::clone(&inner.cache),
        state: Arc::clone(&inner.state),
        abort: Arc::clone(&inner.abort),
        cache_time: inner.config.cache_time,
        key: key.clone(),
        params,
        token: token.clone(),
        generation,
        silent: options.silent,
    };
    let outcome: SharedOutcome = if deduplicate {
        inner
            .cache
            .pending()
            .join_or_register(&key, token.clone(), move || attempt.into_future())
    } else {
        let shared = attempt.into_future().shared();
        // Detached driver, same as the registry's: the outcome settles and
        // writes through the cache even if this caller is cancelled away.
        tokio::spawn(shared.clone());
        shared
    };

    // Race the shared outcome against this attempt's own token so an
    // explicit cancel unblocks the caller without killing the shared
    // future for other joiners.
    let settled: Result<Value> = tokio::select! {
        result = outcome => result,
        _ = token.cancelled() => Err(Error::aborted(inner.abort.cancel_reason(generation))),
    };

    if inner.state.is_closed() {
        return Err(Error::TornDown);
    }
    if !inner.abort.is_current(generation) {
        // A newer call owns visible state now; do not touch it.
        debug!(key = %key, operation = %inner.operation_name, "discarding superseded result");
        return Err(Error::aborted(inner.abort.cancel_reason(generation)));
    }

    match settled {
        Ok(_) if token.is_cancelled() => {
            // The result landed in the same instant as an explicit cancel.
            inner.state.rollback_loading();
            Err(Error::aborted(inner.abort.cancel_reason(generation)))
        }
        Ok(value) => match serde_json::from_value::<T>(value) {
            Ok(data) => {
                inner.state.to_success(data.clone(), Instant::now());
                inner.state.emit_success(&data);
                Ok(data)
            }
            Err(err) => {
                let err = Error::from(err);
                if !options.silent {
                    inner.state.to_error(err.clone());
                }
                inner.state.emit_error(&err);
                Err(err)
            }
        },
        Err(err) if err.is_abort() => {
            // Still the current attempt, so this was an explicit cancel.
            inner.state.rollback_loading();
            Err(err)
        }
        Err(err) => {
            if !options.silent {
                inner.state.to_error(err.clone());
            }
            inner.state.emit_error(&err);
            Err(err)
        }
    }
}

/// Fresh means "serve without fetching". A zero `stale_time` collapses the
/// freshness window into the cache window: whatever the store still holds
/// is fresh.
fn is_fresh(age: Duration, stale_time: Duration) -> bool {
    stale_time.is_zero() || age < stale_time
}

/// Everything the retry loop needs, detached from the query handle so the
/// spawned future does not keep the query alive.
struct AttemptContext<T> {
    operation: Operation<T>,
    retry: RetryPolicy,
    cache: Arc<CacheService>,
    state: Arc<StateCell<T>>,
    abort: Arc<AbortCoordinator>,
    cache_time: Duration,
    key: CacheKey,
    params: QueryParams,
    token: CancellationToken,
    generation: u64,
    silent: bool,
}

impl<T> AttemptContext<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// The retry loop as a boxed future, ready for sharing.
    ///
    /// Yields the operation's value serialized to JSON so deduplicated
    /// callers of any compatible type can deserialize their own copy.
    fn into_future(self) -> BoxFuture<'static, Result<Value>> {
        async move {
            let mut attempt: u32 = 0;
            loop {
                if self.token.is_cancelled() {
                    return Err(Error::aborted(self.abort.cancel_reason(self.generation)));
                }
                attempt += 1;
                let abort_token = AbortToken::new(self.token.clone());
                match (self.operation)(self.params.clone(), abort_token).await {
                    Ok(data) => {
                        if self.token.is_cancelled() {
                            // Arrived after cancellation; discard, never cache.
                            return Err(Error::aborted(
                                self.abort.cancel_reason(self.generation),
                            ));
                        }
                        let value = serde_json::to_value(&data)?;
                        if !self.cache_time.is_zero() {
                            if let Err(err) = self.cache.store().set(&self.key, value.clone()).await
                            {
                                warn!(key = %self.key, error = %err, "cache write-through failed");
                            }
                        }
                        return Ok(value);
                    }
                    Err(err) => {
                        if self.token.is_cancelled() {
                            return Err(Error::aborted(
                                self.abort.cancel_reason(self.generation),
                            ));
                        }
                        let err = Error::operation(err);
                        match self.retry.decide(&err, attempt) {
                            RetryDecision::Retry { delay } => {
                                warn!(
                                    key = %self.key,
                                    attempt,
                                    delay_ms = delay.as_millis() as u64,
                                    error = %err,
                                    "operation failed, retrying"
                                );
                                if !self.silent && self.abort.is_current(self.generation) {
                                    self.state.mutate(|state| state.retry_attempt = attempt);
                                }
                                tokio::select! {
                                    _ = tokio::time::sleep(delay) => {}
                                    _ = self.token.cancelled() => {
                                        return Err(Error::aborted(
                                            self.abort.cancel_reason(self.generation),
                                        ));
                                    }
                                }
                            }
                            RetryDecision::Fail => {
                                debug!(key = %self.key, attempts = attempt, error = %err, "operation failed, giving up");
                                return Err(err);
                            }
                        }
                    }
                }
            }
        }
        .boxed()
    }
}
