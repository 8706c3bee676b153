// Tiffin Core - Reliability substrate shared by every backend service
// NO infrastructure dependencies: backends are injected through `port`

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{
    DurableJobQueue, IdempotencyStore, StoreDegraded, TickReport, TierHealth, TierStatus,
    TieredStateStore,
};
pub use domain::{
    DeadLetterRecord, IdempotencyConfig, IdempotencyRecord, JobRecord, QueueConfig, QueueStatus,
};
pub use error::{AppError, Result};
pub use port::{CacheBackend, JobHandler, StateBackend, StoreBackends};
