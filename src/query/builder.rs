//! Builder for queries.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::abort::{AbortCoordinator, AbortToken};
use super::core::{to_params, Operation, Query, QueryConfig, QueryInner};
use super::execution::{execute_inner, ExecuteOptions};
use super::observer::{Callbacks, QueryObserver};
use super::polling::{self, PollingController};
use super::state::{QueryState, StateCell};
use crate::cache::{CacheService, KeyGenerator};
use crate::error::{Error, ErrorContext};
use crate::retry::RetryPolicy;
use crate::{QueryParams, Result};

/// Builder for [`Query`] instances.
///
/// Keep this surface small and predictable: every knob is a fluent setter,
/// and all validation happens in [`build`](Self::build).
pub struct QueryBuilder<T> {
    operation_name: String,
    operation: Operation<T>,
    params: Result<QueryParams>,
    initial_data: Option<T>,
    immediate: bool,
    config: QueryConfig,
    retry: RetryPolicy,
    cache_service: Option<Arc<CacheService>>,
    key_salt: Option<String>,
    observers: Vec<Arc<dyn QueryObserver<T>>>,
    callbacks: Callbacks<T>,
}

impl<T> QueryBuilder<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new<F, Fut>(operation_name: impl Into<String>, operation: F) -> Self
    where
        F: Fn(QueryParams, AbortToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let operation: Operation<T> =
            Arc::new(move |params, token| operation(params, token).boxed());
        Self {
            operation_name: operation_name.into(),
            operation,
            params: Ok(QueryParams::new()),
            initial_data: None,
            immediate: false,
            config: QueryConfig::default(),
            retry: RetryPolicy::default(),
            cache_service: None,
            key_salt: None,
            observers: Vec::new(),
            callbacks: Callbacks::new(),
        }
    }

    /// Set the instance parameter mapping. Any serializable value works as
    /// long as it serializes to a JSON object.
    pub fn params(mut self, params: impl Serialize) -> Self {
        self.params = to_params(params);
        self
    }

    /// Seed the query with data before the first execution.
    pub fn initial_data(mut self, data: T) -> Self {
        self.initial_data = Some(data);
        self
    }

    /// Execute once automatically as soon as the query is built.
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    /// How long successful results stay in the cache. Zero disables
    /// caching for this query entirely.
    pub fn cache_time(mut self, cache_time: Duration) -> Self {
        self.config.cache_time = cache_time;
        self
    }

    /// How long a cached result is served without re-fetching. Zero means
    /// "fresh for as long as it is cached".
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.config.stale_time = stale_time;
        self
    }

    /// Maximum retries after the first failed invocation.
    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry.max_retries = count;
        self
    }

    /// Base delay between retries.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry.base_delay = delay;
        self
    }

    /// Exponential backoff (default) versus a fixed delay.
    pub fn retry_backoff(mut self, backoff: bool) -> Self {
        self.retry.backoff = backoff;
        self
    }

    /// Clamp backoff delays at `max_delay`.
    pub fn retry_max_delay(mut self, max_delay: Duration) -> Self {
        self.retry.max_delay = Some(max_delay);
        self
    }

    /// Poll the operation at `interval`, silently, starting at build.
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.config.polling_interval = Some(interval);
        self
    }

    /// Surface a visible error after this many consecutive failed polls.
    /// Without a threshold, polling failures never touch visible state.
    pub fn polling_failure_threshold(mut self, threshold: u32) -> Self {
        self.config.polling_failure_threshold = Some(threshold.max(1));
        self
    }

    /// Keep the previous data visible while a re-execution is loading.
    pub fn keep_previous_data(mut self, keep: bool) -> Self {
        self.config.keep_previous_data = keep;
        self
    }

    /// Share in-flight outcomes with identical concurrent requests
    /// (default true).
    pub fn deduplicate(mut self, deduplicate: bool) -> Self {
        self.config.deduplicate = deduplicate;
        self
    }

    /// Share a cache service with other queries. Without one, the query
    /// gets a private in-memory service.
    pub fn cache_service(mut self, service: Arc<CacheService>) -> Self {
        self.cache_service = Some(service);
        self
    }

    /// Namespace this query's cache keys.
    pub fn key_salt(mut self, salt: impl Into<String>) -> Self {
        self.key_salt = Some(salt.into());
        self
    }

    /// Register a full observer. Observers run in registration order.
    pub fn observer(mut self, observer: Arc<dyn QueryObserver<T>>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Called after every visible state change.
    pub fn on_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&QueryState<T>) + Send + Sync + 'static,
    {
        self.callbacks.on_change = Some(Box::new(f));
        self
    }

    /// Called once per successful `execute` with the fetched data.
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.callbacks.on_success = Some(Box::new(f));
        self
    }

    /// Called once per failed `execute` after retries are exhausted.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.callbacks.on_error = Some(Box::new(f));
        self
    }

    /// Called exactly once per `execute`, whatever the outcome.
    pub fn on_finally<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_finally = Some(Box::new(f));
        self
    }

    /// Build the query.
    ///
    /// Must run inside a tokio runtime when `immediate` or polling is
    /// configured, since both spawn work right away.
    pub fn build(self) -> Result<Query<T>> {
        if self.operation_name.trim().is_empty() {
            return Err(Error::validation_with_context(
                "operation name must not be empty",
                ErrorContext::new()
                    .with_field_path("operation_name")
                    .with_source("query_builder"),
            ));
        }
        if let Some(interval) = self.config.polling_interval {
            if interval.is_zero() {
                return Err(Error::validation_with_context(
                    "polling interval must be greater than zero",
                    ErrorContext::new()
                        .with_field_path("polling_interval")
                        .with_source("query_builder"),
                ));
            }
        }
        let params = self.params?;

        let mut observers = self.observers;
        if !self.callbacks.is_empty() {
            observers.push(Arc::new(self.callbacks));
        }
        let cache = self
            .cache_service
            .unwrap_or_else(|| Arc::new(CacheService::new()));
        let keys = match self.key_salt {
            Some(salt) => KeyGenerator::new().with_salt(salt),
            None => KeyGenerator::new(),
        };

        let inner = Arc::new(QueryInner {
            operation_name: self.operation_name,
            operation: self.operation,
            config: self.config,
            retry: self.retry,
            cache,
            keys,
            state: Arc::new(StateCell::new(self.initial_data.clone(), observers)),
            abort: Arc::new(AbortCoordinator::new()),
            params: Mutex::new(params.clone()),
            initial_params: params,
            last_params: Mutex::new(None),
            initial_data: self.initial_data,
            polling: PollingController::new(),
        });

        if self.immediate {
            let query = Arc::downgrade(&inner);
            tokio::spawn(async move {
                if let Some(inner) = query.upgrade() {
                    let _ = execute_inner(&inner, ExecuteOptions::default()).await;
                }
            });
        }
        if inner.config.polling_interval.is_some() {
            polling::start(&inner);
        }

        Ok(Query { inner })
    }
}
