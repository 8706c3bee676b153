// Queue Configuration

use crate::application::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_DEAD_LETTER_LIMIT, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS,
    DEFAULT_POLL_INTERVAL_MS,
};
use crate::domain::error::{DomainError, Result};

/// Queue identifier
pub type QueueName = String;

/// Queue configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Service namespace; the queue persists under `<namespace>:jobs`
    pub namespace: String,
    pub queue_name: QueueName,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub dead_letter_limit: usize,
}

impl QueueConfig {
    pub fn new(namespace: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            queue_name: queue_name.into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            dead_letter_limit: DEFAULT_DEAD_LETTER_LIMIT,
        }
    }

    /// Push notification delivery: fast polling, few attempts
    pub fn push_delivery(namespace: impl Into<String>) -> Self {
        Self::new(namespace, "push-delivery")
            .with_poll_interval_ms(500)
            .with_max_attempts(4)
            .with_backoff(300, 10_000)
    }

    /// Vendor payout reconciliation
    pub fn payout_reconcile(namespace: impl Into<String>) -> Self {
        Self::new(namespace, "payout-reconcile")
            .with_poll_interval_ms(700)
            .with_max_attempts(5)
            .with_backoff(500, 15_000)
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_dead_letter_limit(mut self, dead_letter_limit: usize) -> Self {
        self.dead_letter_limit = dead_letter_limit;
        self
    }

    /// Key of the queue snapshot inside the `<namespace>:jobs` store
    pub fn state_key(&self) -> String {
        format!("queue:{}:state", self.queue_name)
    }

    pub fn validate(&self) -> Result<()> {
        let reason = if self.queue_name.trim().is_empty() {
            Some("queue name is empty")
        } else if self.poll_interval_ms == 0 {
            Some("poll interval must be positive")
        } else if self.max_attempts == 0 {
            Some("max attempts must be at least 1")
        } else if self.dead_letter_limit == 0 {
            Some("dead letter limit must be at least 1")
        } else if self.base_delay_ms > self.max_delay_ms {
            Some("base delay exceeds max delay")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(DomainError::InvalidQueueConfig {
                queue: self.queue_name.clone(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}
