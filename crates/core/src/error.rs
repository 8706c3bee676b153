// Central Error Type for the Substrate

use std::sync::Arc;
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    /// A durable or cache backend could not be reached or rejected a call.
    /// Never escapes state/cache operations; adapters return it so the store can log and degrade.
    #[error("Backend unavailable: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error raised by an idempotent handler, shared by every caller awaiting the same execution
    #[error("Handler error: {0}")]
    Handler(Arc<dyn std::error::Error + Send + Sync>),
}

impl AppError {
    /// Borrow the original handler error, if this is a handler failure of type `E`
    pub fn handler_error<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            AppError::Handler(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error and redis::RedisError conversions live in the infra crates
// (orphan rule), each mapping into AppError::Database / AppError::Backend.
