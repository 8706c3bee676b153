// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_handler;
pub mod state_backend;
pub mod time_provider;

// Re-exports
pub use id_provider::{IdProvider, UuidProvider};
pub use job_handler::{HandlerError, JobHandler};
pub use state_backend::{CacheBackend, StateBackend, StoreBackends};
pub use time_provider::{SystemTimeProvider, TimeProvider};

/// Test doubles for every port
pub mod mocks {
    pub use super::id_provider::mocks::SequentialIdProvider;
    pub use super::state_backend::mocks::{FlakyCacheBackend, FlakyStateBackend};
    pub use super::time_provider::mocks::ManualClock;
}
