//! Observer hooks for query lifecycle events.

use super::state::QueryState;
use crate::Error;

/// Hooks invoked as a query moves through its lifecycle.
///
/// All methods have empty defaults; implement only what you need. Observers
/// run synchronously on the executing task, in registration order, so they
/// must return quickly and never block. Anything slow belongs in a task the
/// observer spawns itself.
///
/// Contract:
/// - `on_change` fires after every visible state write.
/// - `on_success` / `on_error` fire once per settled `execute()` call
///   (silent polling failures included), never for aborted attempts.
/// - `on_finally` fires exactly once per call on every path, including
///   after teardown.
pub trait QueryObserver<T>: Send + Sync {
    fn on_change(&self, _state: &QueryState<T>) {}
    fn on_success(&self, _data: &T) {}
    fn on_error(&self, _error: &Error) {}
    fn on_finally(&self) {}
}

type ChangeFn<T> = Box<dyn Fn(&QueryState<T>) + Send + Sync>;
type SuccessFn<T> = Box<dyn Fn(&T) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&Error) + Send + Sync>;
type FinallyFn = Box<dyn Fn() + Send + Sync>;

/// Closure-based observer assembled by the builder's `on_*` setters.
pub(crate) struct Callbacks<T> {
    pub(crate) on_change: Option<ChangeFn<T>>,
    pub(crate) on_success: Option<SuccessFn<T>>,
    pub(crate) on_error: Option<ErrorFn>,
    pub(crate) on_finally: Option<FinallyFn>,
}

impl<T> Callbacks<T> {
    pub(crate) fn new() -> Self {
        Self {
            on_change: None,
            on_success: None,
            on_error: None,
            on_finally: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.on_change.is_none()
            && self.on_success.is_none()
            && self.on_error.is_none()
            && self.on_finally.is_none()
    }
}

impl<T: Send + Sync> QueryObserver<T> for Callbacks<T> {
    fn on_change(&self, state: &QueryState<T>) {
        if let Some(ref f) = self.on_change {
            f(state);
        }
    }

    fn on_success(&self, data: &T) {
        if let Some(ref f) = self.on_success {
            f(data);
        }
    }

    fn on_error(&self, error: &Error) {
        if let Some(ref f) = self.on_error {
            f(error);
        }
    }

    fn on_finally(&self) {
        if let Some(ref f) = self.on_finally {
            f();
        }
    }
}
