//! Tiered state store
//!
//! One API for durable state and ephemeral TTL cache regardless of which
//! backends are reachable:
//! - every write lands in an in-memory mirror first, then best-effort in the backend
//! - reads prefer the backend and fall back to the mirror on error or absence
//! - a backend that fails to connect during `init` is disabled for the life of the store

use crate::error::Result;
use crate::port::{CacheBackend, StateBackend, StoreBackends, TimeProvider};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Storage tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Durable,
    Cache,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Durable => write!(f, "durable"),
            Tier::Cache => write!(f, "cache"),
        }
    }
}

/// Health of one tier after init
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierHealth {
    /// No backend configured; memory only
    Absent,
    Healthy,
    /// Backend configured but unreachable at init; memory only from now on
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierStatus {
    pub durable: TierHealth,
    pub cache: TierHealth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierFailure {
    pub tier: Tier,
    pub backend: &'static str,
    pub reason: String,
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tier ({}): {}", self.tier, self.backend, self.reason)
    }
}

/// Returned by `init` when at least one configured backend could not be reached.
/// The store keeps working from memory for those tiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("store {namespace:?} degraded to memory: {}", join_failures(.failures))]
pub struct StoreDegraded {
    pub namespace: String,
    pub failures: Vec<TierFailure>,
}

fn join_failures(failures: &[TierFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug)]
struct InitOutcome {
    status: TierStatus,
    failures: Vec<TierFailure>,
}

struct CacheEntry {
    value: String,
    expires_at_unix_ms: i64,
}

pub struct TieredStateStore {
    namespace: String,
    durable: Option<Arc<dyn StateBackend>>,
    cache: Option<Arc<dyn CacheBackend>>,
    clock: Arc<dyn TimeProvider>,
    memory_state: Mutex<HashMap<String, String>>,
    memory_cache: Mutex<HashMap<String, CacheEntry>>,
    init: OnceCell<InitOutcome>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TieredStateStore {
    pub fn new(namespace: impl Into<String>, backends: StoreBackends) -> Self {
        Self {
            namespace: namespace.into(),
            durable: backends.durable,
            cache: backends.cache,
            clock: backends.clock,
            memory_state: Mutex::new(HashMap::new()),
            memory_cache: Mutex::new(HashMap::new()),
            init: OnceCell::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Connect the configured backends. Memoized: only the first call connects,
    /// every call returns the same outcome.
    ///
    /// `Err(StoreDegraded)` is informational; the caller decides whether running
    /// from memory is acceptable. All other operations call this implicitly.
    pub async fn init(&self) -> std::result::Result<(), StoreDegraded> {
        let outcome = self.ensure_init().await;
        if outcome.failures.is_empty() {
            Ok(())
        } else {
            Err(StoreDegraded {
                namespace: self.namespace.clone(),
                failures: outcome.failures.clone(),
            })
        }
    }

    pub async fn tier_status(&self) -> TierStatus {
        self.ensure_init().await.status
    }

    /// Read durable state. Only a corrupt/mismatched encoding is an error.
    pub async fn get_state<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let outcome = self.ensure_init().await;

        if let Some(backend) = self.healthy_durable(outcome) {
            match backend.load(&self.namespace, key).await {
                Ok(Some(raw)) => return Ok(Some(serde_json::from_str(&raw)?)),
                Ok(None) => {}
                Err(e) => warn!(
                    namespace = %self.namespace,
                    key = %key,
                    backend = backend.name(),
                    error = %e,
                    "getState falling back to memory"
                ),
            }
        }

        let raw = lock(&self.memory_state).get(&self.state_key(key)).cloned();
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Write durable state: memory mirror first, then best-effort write-through.
    pub async fn set_state<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let outcome = self.ensure_init().await;
        let encoded = serde_json::to_string(value)?;
        lock(&self.memory_state).insert(self.state_key(key), encoded.clone());

        if let Some(backend) = self.healthy_durable(outcome) {
            if let Err(e) = backend.store(&self.namespace, key, &encoded).await {
                warn!(
                    namespace = %self.namespace,
                    key = %key,
                    backend = backend.name(),
                    error = %e,
                    "setState write-through failed; value kept in memory"
                );
            }
        }
        Ok(())
    }

    /// Read a cache entry. Expired memory entries read as absent and are evicted.
    pub async fn get_cache(&self, key: &str) -> Option<String> {
        let outcome = self.ensure_init().await;
        let scoped = self.cache_key(key);

        if let Some(backend) = self.healthy_cache(outcome) {
            match backend.get(&scoped).await {
                Ok(value) => return value,
                Err(e) => warn!(
                    namespace = %self.namespace,
                    key = %key,
                    backend = backend.name(),
                    error = %e,
                    "getCache falling back to memory"
                ),
            }
        }

        let now = self.clock.now_millis();
        let mut cache = lock(&self.memory_cache);
        match cache.get(&scoped) {
            Some(entry) if entry.expires_at_unix_ms > now => Some(entry.value.clone()),
            Some(_) => {
                cache.remove(&scoped);
                debug!(namespace = %self.namespace, key = %key, "Evicted expired cache entry");
                None
            }
            None => None,
        }
    }

    pub async fn set_cache(&self, key: &str, value: &str, ttl_seconds: u64) {
        let outcome = self.ensure_init().await;
        let scoped = self.cache_key(key);
        let ttl_ms = i64::try_from(ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        let expires_at_unix_ms = self.clock.now_millis().saturating_add(ttl_ms);

        lock(&self.memory_cache).insert(
            scoped.clone(),
            CacheEntry {
                value: value.to_string(),
                expires_at_unix_ms,
            },
        );

        if let Some(backend) = self.healthy_cache(outcome) {
            if let Err(e) = backend.set_with_ttl(&scoped, value, ttl_seconds).await {
                warn!(
                    namespace = %self.namespace,
                    key = %key,
                    backend = backend.name(),
                    error = %e,
                    "setCache write-through failed; value kept in memory"
                );
            }
        }
    }

    async fn ensure_init(&self) -> &InitOutcome {
        self.init.get_or_init(|| self.initialize()).await
    }

    async fn initialize(&self) -> InitOutcome {
        let mut failures = Vec::new();

        let durable = match &self.durable {
            None => TierHealth::Absent,
            Some(backend) => match backend.connect().await {
                Ok(()) => {
                    info!(namespace = %self.namespace, backend = backend.name(), "Durable backend enabled");
                    TierHealth::Healthy
                }
                Err(e) => {
                    warn!(
                        namespace = %self.namespace,
                        backend = backend.name(),
                        error = %e,
                        "Durable backend unavailable; using memory"
                    );
                    failures.push(TierFailure {
                        tier: Tier::Durable,
                        backend: backend.name(),
                        reason: e.to_string(),
                    });
                    TierHealth::Degraded
                }
            },
        };

        let cache = match &self.cache {
            None => TierHealth::Absent,
            Some(backend) => match backend.connect().await {
                Ok(()) => {
                    info!(namespace = %self.namespace, backend = backend.name(), "Cache backend enabled");
                    TierHealth::Healthy
                }
                Err(e) => {
                    warn!(
                        namespace = %self.namespace,
                        backend = backend.name(),
                        error = %e,
                        "Cache backend unavailable; using memory"
                    );
                    failures.push(TierFailure {
                        tier: Tier::Cache,
                        backend: backend.name(),
                        reason: e.to_string(),
                    });
                    TierHealth::Degraded
                }
            },
        };

        InitOutcome {
            status: TierStatus { durable, cache },
            failures,
        }
    }

    fn healthy_durable(&self, outcome: &InitOutcome) -> Option<&Arc<dyn StateBackend>> {
        match outcome.status.durable {
            TierHealth::Healthy => self.durable.as_ref(),
            _ => None,
        }
    }

    fn healthy_cache(&self, outcome: &InitOutcome) -> Option<&Arc<dyn CacheBackend>> {
        match outcome.status.cache {
            TierHealth::Healthy => self.cache.as_ref(),
            _ => None,
        }
    }

    fn state_key(&self, key: &str) -> String {
        format!("{}:state:{}", self.namespace, key)
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}:cache:{}", self.namespace, key)
    }
}
