// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid queue config for {queue:?}: {reason}")]
    InvalidQueueConfig { queue: String, reason: String },

    #[error("Invalid idempotency config: {0}")]
    InvalidIdempotencyConfig(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
