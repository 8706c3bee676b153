// Backend Ports for the tiered store
//
// Adapters:
// - durable tier: tiffin-infra-sqlite (SqliteStateBackend)
// - cache tier:   tiffin-infra-redis  (RedisCacheBackend)
// Absence of an adapter is the null default: the store serves that tier from memory.

use crate::error::Result;
use crate::port::time_provider::{SystemTimeProvider, TimeProvider};
use async_trait::async_trait;
use std::sync::Arc;

/// Durable key/value state, last-writer-wins
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Establish the connection and any schema. Called once by the store's init.
    async fn connect(&self) -> Result<()>;

    /// Read the serialized value for `(namespace, key)`
    async fn load(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    /// Upsert the serialized value for `(namespace, key)`
    async fn store(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

    /// Short adapter name for logs (e.g. "sqlite")
    fn name(&self) -> &'static str;
}

/// Ephemeral TTL cache
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn connect(&self) -> Result<()>;

    /// Read a value; expired entries must read as `None`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Backend set injected into every store, queue and idempotency store
#[derive(Clone)]
pub struct StoreBackends {
    pub durable: Option<Arc<dyn StateBackend>>,
    pub cache: Option<Arc<dyn CacheBackend>>,
    pub clock: Arc<dyn TimeProvider>,
}

impl StoreBackends {
    /// No backends: both tiers live in process memory
    pub fn memory_only() -> Self {
        Self {
            durable: None,
            cache: None,
            clock: Arc::new(SystemTimeProvider),
        }
    }

    pub fn with_durable(mut self, durable: Arc<dyn StateBackend>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for StoreBackends {
    fn default() -> Self {
        Self::memory_only()
    }
}

impl std::fmt::Debug for StoreBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBackends")
            .field("durable", &self.durable.as_ref().map(|b| b.name()))
            .field("cache", &self.cache.as_ref().map(|b| b.name()))
            .finish()
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory durable backend that can be told to fail
    #[derive(Default)]
    pub struct FlakyStateBackend {
        entries: Mutex<HashMap<(String, String), String>>,
        fail_connect: AtomicBool,
        fail_calls: AtomicBool,
        store_calls: AtomicUsize,
    }

    impl FlakyStateBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// A backend whose `connect` always fails
        pub fn unreachable() -> Self {
            let backend = Self::default();
            backend.fail_connect.store(true, Ordering::SeqCst);
            backend
        }

        /// Make every subsequent load/store fail (or succeed again)
        pub fn set_failing(&self, failing: bool) {
            self.fail_calls.store(failing, Ordering::SeqCst);
        }

        pub fn entry(&self, namespace: &str, key: &str) -> Option<String> {
            self.entries
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), key.to_string()))
                .cloned()
        }

        pub fn store_calls(&self) -> usize {
            self.store_calls.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<()> {
            if self.fail_calls.load(Ordering::SeqCst) {
                return Err(AppError::Backend("flaky state backend is down".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StateBackend for FlakyStateBackend {
        async fn connect(&self) -> Result<()> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(AppError::Backend("connection refused".to_string()));
            }
            Ok(())
        }

        async fn load(&self, namespace: &str, key: &str) -> Result<Option<String>> {
            self.check()?;
            Ok(self.entry(namespace, key))
        }

        async fn store(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
            self.store_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            self.entries
                .lock()
                .unwrap()
                .insert((namespace.to_string(), key.to_string()), value.to_string());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "flaky-state"
        }
    }

    /// In-memory cache backend that can be told to fail. Records TTLs, never expires.
    #[derive(Default)]
    pub struct FlakyCacheBackend {
        entries: Mutex<HashMap<String, (String, u64)>>,
        fail_connect: AtomicBool,
        fail_calls: AtomicBool,
    }

    impl FlakyCacheBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn unreachable() -> Self {
            let backend = Self::default();
            backend.fail_connect.store(true, Ordering::SeqCst);
            backend
        }

        pub fn set_failing(&self, failing: bool) {
            self.fail_calls.store(failing, Ordering::SeqCst);
        }

        /// TTL passed with the last write of `key`
        pub fn ttl_of(&self, key: &str) -> Option<u64> {
            self.entries.lock().unwrap().get(key).map(|(_, ttl)| *ttl)
        }

        fn check(&self) -> Result<()> {
            if self.fail_calls.load(Ordering::SeqCst) {
                return Err(AppError::Backend("flaky cache backend is down".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CacheBackend for FlakyCacheBackend {
        async fn connect(&self) -> Result<()> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(AppError::Backend("connection refused".to_string()));
            }
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.check()?;
            Ok(self.entries.lock().unwrap().get(key).map(|(v, _)| v.clone()))
        }

        async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
            self.check()?;
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (value.to_string(), ttl_seconds));
            Ok(())
        }

        fn name(&self) -> &'static str {
            "flaky-cache"
        }
    }
}
