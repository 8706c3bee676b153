// Substrate defaults (no magic values)

/// Queue poll interval when none is configured (750ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 750;

/// Executions allowed before a job is dead-lettered
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// First retry delay (500ms); doubles per attempt
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Retry delay ceiling (30s)
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Dead letters kept per queue; oldest dropped beyond this
pub const DEFAULT_DEAD_LETTER_LIMIT: usize = 500;

/// Dead letters returned by `list_dead_letters` when the caller has no preference
pub const DEFAULT_DEAD_LETTER_PAGE: usize = 100;

/// Idempotency record lifetime (5 minutes)
pub const DEFAULT_IDEMPOTENCY_TTL_SECONDS: u64 = 300;

/// Namespace suffix of the store backing a job queue
pub const JOBS_NAMESPACE_SUFFIX: &str = "jobs";

/// Namespace suffix of the store backing an idempotency store
pub const IDEMPOTENCY_NAMESPACE_SUFFIX: &str = "idempotency";
