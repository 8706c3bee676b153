// Application Layer - the three reliability components and their policies

pub mod constants;
pub mod idempotency;
pub mod job_queue;
pub mod retry;
pub mod state_store;

// Re-exports
pub use idempotency::IdempotencyStore;
pub use job_queue::{DurableJobQueue, TickReport};
pub use retry::{RetryDecision, RetryPolicy};
pub use state_store::{StoreDegraded, Tier, TierFailure, TierHealth, TierStatus, TieredStateStore};
