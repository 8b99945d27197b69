//! Retry policy for delivery attempts.

use std::time::Duration;

use crate::delivery::DeliveryOutcome;

/// What to do after an attempt finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run `next_attempt` after `delay`.
    Retry { next_attempt: u32, delay: Duration },
    /// Terminal: success or permanent failure.
    Stop,
    /// Terminal: transient failures used up the attempt budget.
    Exhausted,
}

/// Trait for retry strategies.
pub trait RetryStrategy: Send + Sync {
    /// Delay before the attempt following `attempt`, or `None` if the budget
    /// does not allow one. Attempts are 0-indexed.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Total attempts allowed, including the first.
    fn max_attempts(&self) -> u32;

    /// Decides the follow-up for an attempt with the given outcome.
    fn decide(&self, outcome: DeliveryOutcome, attempt: u32) -> RetryDecision {
        if !outcome.is_retryable() {
            return RetryDecision::Stop;
        }

        match self.next_delay(attempt) {
            Some(delay) => RetryDecision::Retry {
                next_attempt: attempt + 1,
                delay,
            },
            None => RetryDecision::Exhausted,
        }
    }
}

/// Exponential backoff retry strategy.
///
/// After attempt `k` fails the next one runs after `base * 2^k`. No jitter;
/// no cap unless `max_delay` is set.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Base delay.
    pub base: Duration,
    /// Optional delay cap.
    pub max_delay: Option<Duration>,
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
}

impl ExponentialBackoff {
    /// Creates a strategy with a 1s base and 5 attempts.
    pub fn new() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: None,
            max_attempts: 5,
        }
    }

    /// Sets the base delay.
    pub fn base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Caps the delay.
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }

    /// Sets the maximum attempts.
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt.saturating_add(1) >= self.max_attempts {
            return None;
        }

        let multiplier = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(multiplier);

        Some(match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        })
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
