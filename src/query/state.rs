//! Externally visible query state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tracing::trace;

use super::observer::QueryObserver;
use crate::Error;

/// Lifecycle phase of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Built but never executed (or reset).
    Idle,
    /// An execution is in flight and not silent.
    Loading,
    /// The last visible execution produced data.
    Success,
    /// The last visible execution failed after exhausting retries.
    Error,
}

/// Snapshot of one query's state at a point in time.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<Error>,
    /// When the current `data` was produced by an execution or mutation.
    pub fetched_at: Option<Instant>,
    /// Retry attempts consumed by the in-flight execution, reset on success.
    pub retry_attempt: u32,
    /// Successful polling ticks since build or reset.
    pub polling_count: u64,
}

impl<T> QueryState<T> {
    pub(crate) fn initial(initial_data: Option<T>) -> Self {
        Self {
            status: QueryStatus::Idle,
            data: initial_data,
            error: None,
            fetched_at: None,
            retry_attempt: 0,
            polling_count: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == QueryStatus::Idle
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }
}

/// Holder of one query's state plus its registered observers.
///
/// Writes happen under a short synchronous lock; `on_change` runs after the
/// lock is released, on the writing task. Once `close()` has been called no
/// write goes through and success/error notifications are dropped, which is
/// what keeps torn-down queries inert while in-flight work unwinds.
pub(crate) struct StateCell<T> {
    state: Mutex<QueryState<T>>,
    closed: AtomicBool,
    observers: Vec<Arc<dyn QueryObserver<T>>>,
}

impl<T> StateCell<T> {
    pub(crate) fn new(initial_data: Option<T>, observers: Vec<Arc<dyn QueryObserver<T>>>) -> Self {
        Self {
            state: Mutex::new(QueryState::initial(initial_data)),
            closed: AtomicBool::new(false),
            observers,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Latch the cell shut. Returns false if it was already closed.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn emit_success(&self, data: &T) {
        if self.is_closed() {
            return;
        }
        for observer in &self.observers {
            observer.on_success(data);
        }
    }

    pub(crate) fn emit_error(&self, error: &Error) {
        if self.is_closed() {
            return;
        }
        for observer in &self.observers {
            observer.on_error(error);
        }
    }

    /// Fires on every completed call, torn down or not.
    pub(crate) fn emit_finally(&self) {
        for observer in &self.observers {
            observer.on_finally();
        }
    }
}

impl<T: Clone> StateCell<T> {
    pub(crate) fn snapshot(&self) -> QueryState<T> {
        self.state.lock().unwrap().clone()
    }

    /// Apply `f` to the state and notify observers, unless closed.
    ///
    /// Returns whether the write went through.
    pub(crate) fn mutate<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut QueryState<T>),
    {
        if self.is_closed() {
            return false;
        }
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            f(&mut state);
            state.clone()
        };
        trace!(status = ?snapshot.status, "query state changed");
        for observer in &self.observers {
            observer.on_change(&snapshot);
        }
        true
    }

    pub(crate) fn to_loading(&self, keep_previous_data: bool) {
        self.mutate(|state| {
            state.status = QueryStatus::Loading;
            state.error = None;
            if !keep_previous_data {
                state.data = None;
            }
        });
    }

    pub(crate) fn to_success(&self, data: T, fetched_at: Instant) {
        self.mutate(|state| {
            state.status = QueryStatus::Success;
            state.data = Some(data);
            state.error = None;
            state.fetched_at = Some(fetched_at);
            state.retry_attempt = 0;
        });
    }

    pub(crate) fn to_error(&self, error: Error) {
        self.mutate(|state| {
            state.status = QueryStatus::Error;
            state.error = Some(error);
        });
    }

    /// Undo a `Loading` transition whose execution was aborted.
    ///
    /// Falls back to `Success` when data is still visible, `Idle` otherwise.
    /// No visible error is written for aborts.
    pub(crate) fn rollback_loading(&self) {
        self.mutate(|state| {
            if state.status == QueryStatus::Loading {
                state.status = if state.data.is_some() {
                    QueryStatus::Success
                } else {
                    QueryStatus::Idle
                };
            }
        });
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct ChangeCounter(AtomicUsize);

    impl QueryObserver<u32> for ChangeCounter {
        fn on_change(&self, _state: &QueryState<u32>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_initial_state() {
        let cell: StateCell<u32> = StateCell::new(Some(7), Vec::new());
        let state = cell.snapshot();
        assert!(state.is_idle());
        assert_eq!(state.data, Some(7));
        assert!(state.error.is_none());
    }

    #[test]
    fn test_closed_cell_rejects_writes() {
        let observer = Arc::new(ChangeCounter(AtomicUsize::new(0)));
        let cell: StateCell<u32> = StateCell::new(None, vec![observer.clone()]);

        assert!(cell.mutate(|s| s.data = Some(1)));
        assert!(cell.close());
        assert!(!cell.close());
        assert!(!cell.mutate(|s| s.data = Some(2)));

        assert_eq!(cell.snapshot().data, Some(1));
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rollback_loading() {
        let cell: StateCell<u32> = StateCell::new(None, Vec::new());
        cell.to_loading(false);
        cell.rollback_loading();
        assert!(cell.snapshot().is_idle());

        cell.to_success(5, Instant::now());
        cell.to_loading(true);
        cell.rollback_loading();
        let state = cell.snapshot();
        assert!(state.is_success());
        assert_eq!(state.data, Some(5));
    }
}
