//! Retry policy for failed execution attempts.

use std::time::Duration;

use crate::Error;

/// Decision for how to proceed after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Fail,
}

/// Bounded retry with fixed or exponential backoff.
///
/// Keep this deterministic and explainable: the policy sees only the error
/// and the attempt number, never runtime signals.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff: bool,
    pub max_delay: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: bool) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Decide what to do after a failed attempt.
    ///
    /// `attempt` is 1-based: the first failed invocation passes 1.
    /// Cancellation-class errors fail immediately no matter the budget.
    pub fn decide(&self, err: &Error, attempt: u32) -> RetryDecision {
        if !err.is_retryable() || attempt > self.max_retries {
            return RetryDecision::Fail;
        }
        RetryDecision::Retry {
            delay: self.delay_for(attempt),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Fixed mode always yields the base delay; backoff mode doubles per
    /// attempt (base, 2x, 4x, ...) with shift saturation, clamped by
    /// `max_delay` when set.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = if self.backoff {
            let factor = 1u32
                .checked_shl(attempt.saturating_sub(1))
                .unwrap_or(u32::MAX);
            self.base_delay.saturating_mul(factor)
        } else {
            self.base_delay
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_secs(1),
            backoff: true,
            max_delay: None,
        }
    }
}
