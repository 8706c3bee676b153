// Idempotency Domain Model

use crate::application::constants::DEFAULT_IDEMPOTENCY_TTL_SECONDS;
use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Persisted response of the first successful execution of a key. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord<R> {
    /// Normalized key (trimmed, lowercase)
    pub key: String,
    pub response: R,
    pub created_at_iso: String,
    pub expires_at_unix_ms: i64,
}

impl<R> IdempotencyRecord<R> {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at_unix_ms <= now_millis
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyConfig {
    /// Service namespace; records persist under `<namespace>:idempotency`
    pub namespace: String,
    pub ttl_seconds: u64,
}

impl IdempotencyConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ttl_seconds: DEFAULT_IDEMPOTENCY_TTL_SECONDS,
        }
    }

    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl_seconds == 0 {
            return Err(DomainError::InvalidIdempotencyConfig(
                "ttl must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Normalize a caller-supplied key: trim and lowercase
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Build the collaborator key format `<operation>:<actorId>:<resourceId>:<clientKey>`
pub fn scoped_key(operation: &str, actor_id: &str, resource_id: &str, client_key: &str) -> String {
    format!("{operation}:{actor_id}:{resource_id}:{client_key}")
}
