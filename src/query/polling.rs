//! Interval polling with silent re-execution.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::core::QueryInner;
use super::execution::{execute_inner, ExecuteOptions};

/// Owns the stop token of the active polling task, if one is running.
pub(crate) struct PollingController {
    stop: Mutex<Option<CancellationToken>>,
}

impl PollingController {
    pub(crate) fn new() -> Self {
        Self {
            stop: Mutex::new(None),
        }
    }
}

pub(crate) fn is_active(polling: &PollingController) -> bool {
    polling
        .stop
        .lock()
        .unwrap()
        .as_ref()
        .map(|token| !token.is_cancelled())
        .unwrap_or(false)
}

/// Start the polling task. Idempotent; a no-op without a configured
/// interval. The task holds only a weak reference, so polling never keeps
/// a dropped query alive.
pub(crate) fn start<T>(inner: &Arc<QueryInner<T>>)
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let Some(interval) = inner.config.polling_interval else {
        return;
    };
    if inner.state.is_closed() {
        return;
    }

    let mut slot = inner.polling.stop.lock().unwrap();
    if slot.as_ref().map(|t| !t.is_cancelled()).unwrap_or(false) {
        return;
    }
    let stop = CancellationToken::new();
    *slot = Some(stop.clone());
    drop(slot);

    debug!(operation = %inner.operation_name, interval_ms = interval.as_millis() as u64, "polling started");
    let query = Arc::downgrade(inner);
    let threshold = inner.config.polling_failure_threshold;
    tokio::spawn(poll_loop(query, interval, stop, threshold));
}

/// Cancel the polling task and with it any pending tick timer.
pub(crate) fn stop(polling: &PollingController) {
    if let Some(token) = polling.stop.lock().unwrap().take() {
        token.cancel();
    }
}

async fn poll_loop<T>(
    query: Weak<QueryInner<T>>,
    interval: Duration,
    stop: CancellationToken,
    threshold: Option<u32>,
) where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let mut consecutive_failures: u32 = 0;
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        let Some(inner) = query.upgrade() else {
            return;
        };
        if inner.state.is_closed() {
            return;
        }

        // Ticks fetch fresh data on purpose; serving a poll from the entry
        // the previous tick wrote would make every tick after the first a
        // no-op.
        let options = ExecuteOptions {
            silent: true,
            ignore_cache: true,
            ..ExecuteOptions::default()
        };
        match execute_inner(&inner, options).await {
            Ok(_) => {
                consecutive_failures = 0;
                inner.state.mutate(|state| state.polling_count += 1);
            }
            Err(err) if err.is_abort() || err.is_teardown() => {
                // A manual execute or shutdown raced this tick; not a
                // failure of the polled operation.
            }
            Err(err) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                warn!(
                    operation = %inner.operation_name,
                    consecutive_failures,
                    error = %err,
                    "polling tick failed"
                );
                // Swallowed from visible state unless a failure threshold
                // says enough is enough; then surface the error once and
                // keep polling.
                if let Some(threshold) = threshold {
                    if consecutive_failures == threshold {
                        inner.state.to_error(err);
                    }
                }
            }
        }
    }
}
