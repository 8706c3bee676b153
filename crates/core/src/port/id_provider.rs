// Job id port

/// Mints the `job_…` ids stamped on enqueued jobs
pub trait IdProvider: Send + Sync {
    fn generate_id(&self) -> String;
}

/// UUID v4 provider (production), `job_<uuid>`
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        format!("job_{}", uuid::Uuid::new_v4().simple())
    }
}

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Sequential IDs: job_1, job_2, ...
    #[derive(Default)]
    pub struct SequentialIdProvider {
        next: AtomicU64,
    }

    impl IdProvider for SequentialIdProvider {
        fn generate_id(&self) -> String {
            format!("job_{}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }
}
