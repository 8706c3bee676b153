// Domain Layer - Records persisted by the substrate and their configuration

pub mod error;
pub mod idempotency;
pub mod job;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use idempotency::{IdempotencyConfig, IdempotencyRecord};
pub use job::{DeadLetterRecord, JobId, JobRecord, QueueSnapshot, QueueStatus};
pub use queue::{QueueConfig, QueueName};
