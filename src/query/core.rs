//! Query handle and lifecycle operations.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::abort::{AbortCoordinator, AbortToken};
use super::builder::QueryBuilder;
use super::execution::{execute_inner, ExecuteOptions};
use super::polling::{self, PollingController};
use super::state::{QueryState, QueryStatus, StateCell};
use crate::cache::{CacheKey, CacheService, KeyGenerator};
use crate::error::{Error, ErrorContext};
use crate::retry::RetryPolicy;
use crate::{QueryParams, Result};

/// The async operation a query wraps.
///
/// Receives the merged parameters for the call and the attempt's abort
/// token; returns the fetched value or an application-level error.
pub type Operation<T> =
    Arc<dyn Fn(QueryParams, AbortToken) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Behavior knobs resolved by the builder.
#[derive(Debug, Clone)]
pub(crate) struct QueryConfig {
    pub cache_time: Duration,
    pub stale_time: Duration,
    pub keep_previous_data: bool,
    pub deduplicate: bool,
    pub polling_interval: Option<Duration>,
    pub polling_failure_threshold: Option<u32>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cache_time: Duration::from_secs(10 * 60),
            stale_time: Duration::ZERO,
            keep_previous_data: false,
            deduplicate: true,
            polling_interval: None,
            polling_failure_threshold: None,
        }
    }
}

pub(crate) struct QueryInner<T> {
    pub(crate) operation_name: String,
    pub(crate) operation: Operation<T>,
    pub(crate) config: QueryConfig,
    pub(crate) retry: RetryPolicy,
    pub(crate) cache: Arc<CacheService>,
    pub(crate) keys: KeyGenerator,
    pub(crate) state: Arc<StateCell<T>>,
    pub(crate) abort: Arc<AbortCoordinator>,
    pub(crate) params: Mutex<QueryParams>,
    pub(crate) initial_params: QueryParams,
    pub(crate) last_params: Mutex<Option<QueryParams>>,
    pub(crate) initial_data: Option<T>,
    pub(crate) polling: PollingController,
}

impl<T> QueryInner<T> {
    /// Instance params overlaid with a per-call override (top-level keys).
    pub(crate) fn merged_params(&self, overrides: Option<&QueryParams>) -> QueryParams {
        let mut params = self.params.lock().unwrap().clone();
        if let Some(overrides) = overrides {
            for (key, value) in overrides {
                params.insert(key.clone(), value.clone());
            }
        }
        params
    }

    /// Key for the parameters the query last executed with (instance params
    /// if it never ran).
    pub(crate) fn current_key(&self) -> Result<CacheKey> {
        let params = match self.last_params.lock().unwrap().clone() {
            Some(params) => params,
            None => self.params.lock().unwrap().clone(),
        };
        self.keys.generate(&self.operation_name, &params)
    }
}

fn teardown_inner<T>(inner: &QueryInner<T>) {
    if inner.state.close() {
        debug!(operation = %inner.operation_name, "query torn down");
        inner.abort.cancel_current();
        polling::stop(&inner.polling);
    }
}

impl<T> Drop for QueryInner<T> {
    fn drop(&mut self) {
        teardown_inner(self);
    }
}

/// Handle to one query: a wrapped async operation plus its visible state,
/// cache wiring, retry policy and polling.
///
/// Cloning the handle is cheap and shares the same underlying query; the
/// query tears itself down when the last handle is dropped.
pub struct Query<T> {
    pub(crate) inner: Arc<QueryInner<T>>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("operation_name", &self.inner.operation_name)
            .finish_non_exhaustive()
    }
}

impl<T> Query<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Start building a query around `operation`.
    ///
    /// `operation_name` is the stable identity used for cache keys; two
    /// queries wrapping the same endpoint should share it.
    pub fn builder<F, Fut>(operation_name: impl Into<String>, operation: F) -> QueryBuilder<T>
    where
        F: Fn(QueryParams, AbortToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        QueryBuilder::new(operation_name, operation)
    }

    /// Snapshot of the current visible state.
    pub fn state(&self) -> QueryState<T> {
        self.inner.state.snapshot()
    }

    pub fn status(&self) -> QueryStatus {
        self.inner.state.snapshot().status
    }

    pub fn data(&self) -> Option<T> {
        self.inner.state.snapshot().data
    }

    /// The cache key the query resolves to right now.
    pub fn cache_key(&self) -> Result<CacheKey> {
        self.inner.current_key()
    }

    /// The cache service this query reads and writes through.
    pub fn cache_service(&self) -> &Arc<CacheService> {
        &self.inner.cache
    }

    /// Replace the instance parameter mapping without executing.
    ///
    /// Takes effect on the next `execute` or `refresh`.
    pub fn update_params(&self, params: impl Serialize) -> Result<()> {
        let params = to_params(params)?;
        *self.inner.params.lock().unwrap() = params;
        Ok(())
    }

    /// Re-execute with the parameters of the previous run.
    pub async fn refresh(&self) -> Result<T> {
        let last = self.inner.last_params.lock().unwrap().clone();
        let options = ExecuteOptions {
            params_override: last,
            ..ExecuteOptions::default()
        };
        execute_inner(&self.inner, options).await
    }

    /// Cancel the in-flight execution, if any.
    ///
    /// The awaiting caller unblocks with an abort error; visible state rolls
    /// back out of `Loading` without surfacing an error.
    pub fn cancel(&self) {
        debug!(operation = %self.inner.operation_name, "cancelling in-flight request");
        self.inner.abort.cancel_current();
    }

    /// Return the query to its freshly built state.
    ///
    /// In-flight work is cancelled, visible state reverts to `Idle` with the
    /// configured initial data, and polling restarts if configured. Shared
    /// cache entries are left alone; other queries may still rely on them.
    pub fn reset(&self) {
        debug!(operation = %self.inner.operation_name, "resetting query");
        self.inner.abort.cancel_current();
        *self.inner.params.lock().unwrap() = self.inner.initial_params.clone();
        *self.inner.last_params.lock().unwrap() = None;
        let initial_data = self.inner.initial_data.clone();
        self.inner.state.mutate(|state| {
            *state = QueryState::initial(initial_data);
        });
        polling::stop(&self.inner.polling);
        if self.inner.config.polling_interval.is_some() {
            polling::start(&self.inner);
        }
    }

    /// Resume interval polling. No-op when already polling or when no
    /// polling interval was configured.
    pub fn start_polling(&self) {
        polling::start(&self.inner);
    }

    /// Stop interval polling and clear any pending tick.
    pub fn stop_polling(&self) {
        polling::stop(&self.inner.polling);
    }

    pub fn is_polling(&self) -> bool {
        polling::is_active(&self.inner.polling)
    }

    /// Shut the query down for good.
    ///
    /// Idempotent. In-flight work may still finish but can no longer write
    /// state or fire success/error callbacks; `on_finally` still runs.
    pub fn teardown(&self) {
        teardown_inner(&self.inner);
    }
}

/// Convert any serializable value into a parameter mapping.
///
/// Fails fast instead of mis-keying: values that do not serialize to a JSON
/// object (or null, for "no params") are rejected here, before any cache or
/// network activity.
pub(crate) fn to_params(params: impl Serialize) -> Result<QueryParams> {
    let value = serde_json::to_value(params)?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(QueryParams::new()),
        other => Err(Error::validation_with_context(
            "query params must serialize to a JSON object",
            ErrorContext::new()
                .with_field_path("params")
                .with_details(format!("got JSON {}", json_type_name(&other)))
                .with_source("query_params"),
        )),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
