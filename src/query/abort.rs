//! Cooperative cancellation with supersession.

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::error::AbortReason;

/// Handle passed to the wrapped operation so it can observe cancellation.
///
/// Cancellation is cooperative: the runtime signals the token and stops
/// acting on stale results, but it is the operation's job to check the token
/// and bail out promptly. Nothing force-kills the operation's work.
#[derive(Debug, Clone)]
pub struct AbortToken {
    token: CancellationToken,
}

impl AbortToken {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Whether this attempt has been cancelled or replaced.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once this attempt is cancelled, for use in `select!` arms.
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }
}

struct Slot {
    token: CancellationToken,
    generation: u64,
    key: Option<String>,
}

/// Issues one cancellation token per execution attempt on a query.
///
/// Generation numbers, not timestamps, decide which attempt is current; two
/// executions started within the same clock tick still order correctly.
/// The slot remembers the cache key the attempt was started for, so a call
/// repeating an identical in-flight request can join it instead of
/// superseding it.
pub(crate) struct AbortCoordinator {
    slot: Mutex<Slot>,
}

impl AbortCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                token: CancellationToken::new(),
                generation: 0,
                key: None,
            }),
        }
    }

    /// Cancel the in-flight attempt, if any, and mint the next one.
    pub(crate) fn begin_attempt(&self, key: &str) -> (CancellationToken, u64) {
        let mut slot = self.slot.lock().unwrap();
        slot.token.cancel();
        slot.generation += 1;
        slot.token = CancellationToken::new();
        slot.key = Some(key.to_string());
        (slot.token.clone(), slot.generation)
    }

    /// The live attempt started for `key`, if that is what is in flight.
    pub(crate) fn current_for(&self, key: &str) -> Option<(CancellationToken, u64)> {
        let slot = self.slot.lock().unwrap();
        if slot.key.as_deref() == Some(key) && !slot.token.is_cancelled() {
            Some((slot.token.clone(), slot.generation))
        } else {
            None
        }
    }

    /// Cancel the in-flight attempt without starting a new one.
    ///
    /// The generation stays put, which is how an observing attempt can tell
    /// an explicit cancel apart from being superseded.
    pub(crate) fn cancel_current(&self) {
        let slot = self.slot.lock().unwrap();
        slot.token.cancel();
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.slot.lock().unwrap().generation == generation
    }

    /// Why the attempt with `generation` stopped: replaced by a newer one,
    /// or cancelled in place.
    pub(crate) fn cancel_reason(&self, generation: u64) -> AbortReason {
        if self.is_current(generation) {
            AbortReason::Cancelled
        } else {
            AbortReason::Superseded
        }
    }
}
