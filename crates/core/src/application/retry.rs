// Retry policy for durable queues
use crate::domain::QueueConfig;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the job after `delay_ms`
    Retry(u64),
    /// Attempts exhausted; move to dead letters
    DeadLetter,
}

/// Exponential backoff with a ceiling:
///
/// `delay(attempt) = min(base_delay_ms * 2^(attempt-1), max_delay_ms)`, attempt >= 1
///
/// base 500 / max 10_000 gives 500, 1000, 2000, 4000, 8000, 10000, 10000, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay_ms, config.max_delay_ms)
    }

    /// Backoff before the next run after `attempt` failures. Attempt 0 is treated as 1.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Decide what happens to a job that has just failed for the `failed_attempt`-th time
    pub fn decide(&self, failed_attempt: u32) -> RetryDecision {
        if failed_attempt >= self.max_attempts {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::Retry(self.delay_ms(failed_attempt))
        }
    }
}
