// Job Handler Port
// The consumer side of a durable queue: notification push delivery, payout reconciliation, ...

use crate::domain::JobRecord;
use async_trait::async_trait;
use std::future::Future;

/// Error returned by a handler. Only its Display text is kept (as `lastError`).
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Executes one job. Returning `Err` (or panicking) counts as a failed attempt.
#[async_trait]
pub trait JobHandler<T>: Send + Sync {
    async fn handle(&self, job: JobRecord<T>) -> Result<(), HandlerError>;
}

/// Any `Fn(JobRecord<T>) -> impl Future<Output = Result<(), HandlerError>>` is a handler
#[async_trait]
impl<T, F, Fut> JobHandler<T> for F
where
    T: Send + 'static,
    F: Fn(JobRecord<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, job: JobRecord<T>) -> Result<(), HandlerError> {
        (self)(job).await
    }
}
