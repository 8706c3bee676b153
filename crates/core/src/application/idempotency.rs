// Idempotency Store
//
// At most one logical execution per normalized key within the TTL window:
// - a persisted, unexpired record short-circuits the handler
// - concurrent callers with the same key share one in-flight execution
// - only successful executions are recorded, so failures are retryable
//
// Each execution runs on its own task, so cancelling any one caller (including
// the one that started it) neither aborts the handler nor frees the key early.

use crate::application::constants::IDEMPOTENCY_NAMESPACE_SUFFIX;
use crate::application::state_store::TieredStateStore;
use crate::domain::idempotency::normalize_key;
use crate::domain::job::iso_timestamp;
use crate::domain::{IdempotencyConfig, IdempotencyRecord};
use crate::error::{AppError, Result};
use crate::port::{StoreBackends, TimeProvider};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

type SharedError = Arc<dyn Error + Send + Sync>;
type Execution = Shared<BoxFuture<'static, std::result::Result<Value, SharedError>>>;

pub struct IdempotencyStore {
    inner: Arc<Inner>,
}

struct Inner {
    config: IdempotencyConfig,
    store: TieredStateStore,
    clock: Arc<dyn TimeProvider>,
    /// normalized key -> (generation, execution)
    in_flight: Mutex<HashMap<String, (u64, Execution)>>,
    generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn record_key(normalized: &str) -> String {
    format!("key:{normalized}")
}

/// Held by the execution task; frees the key when the task ends, panics included
struct InFlightGuard {
    inner: Arc<Inner>,
    key: String,
    generation: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.inner.in_flight);
        if matches!(in_flight.get(&self.key), Some((current, _)) if *current == self.generation) {
            in_flight.remove(&self.key);
        }
    }
}

impl IdempotencyStore {
    /// Records persist in a `<namespace>:idempotency` tiered store
    pub fn new(config: IdempotencyConfig, backends: StoreBackends) -> Result<Self> {
        config.validate()?;
        let namespace = format!("{}:{}", config.namespace, IDEMPOTENCY_NAMESPACE_SUFFIX);
        let clock = Arc::clone(&backends.clock);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store: TieredStateStore::new(namespace, backends),
                clock,
                in_flight: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &TieredStateStore {
        &self.inner.store
    }

    /// Run `handler` at most once per key within the TTL and return its response.
    /// Must be called from within a Tokio runtime.
    ///
    /// A handler error reaches every caller sharing the execution as
    /// [`AppError::Handler`]; recover the original with [`AppError::handler_error`].
    pub async fn execute<R, F, Fut, E>(&self, key: &str, handler: F) -> Result<R>
    where
        R: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: Error + Send + Sync + 'static,
    {
        let key = normalize_key(key);

        if let Some(record) = self.get::<R>(&key).await? {
            debug!(namespace = %self.inner.config.namespace, key = %key, "Idempotent replay");
            return Ok(record.response);
        }

        let execution = {
            let mut in_flight = lock(&self.inner.in_flight);
            let existing = in_flight.get(&key).map(|(_, execution)| execution.clone());
            match existing {
                Some(execution) => {
                    debug!(namespace = %self.inner.config.namespace, key = %key, "Joining in-flight execution");
                    execution
                }
                None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);
                    let task_key = key.clone();
                    let work = handler();
                    // the guard cannot clear the entry before it is inserted: both take this lock
                    let task = tokio::spawn(async move {
                        let _release = InFlightGuard {
                            inner: Arc::clone(&inner),
                            key: task_key.clone(),
                            generation,
                        };
                        inner.run_once(task_key, work).await
                    });
                    let execution = task
                        .map(|joined| joined.unwrap_or_else(|e| Err(Arc::new(e) as SharedError)))
                        .boxed()
                        .shared();
                    in_flight.insert(key.clone(), (generation, execution.clone()));
                    execution
                }
            }
        };

        match execution.await {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(e) => Err(AppError::Handler(e)),
        }
    }

    /// Unexpired record for `key`, if any. Expiry is checked on read.
    pub async fn get<R: DeserializeOwned>(&self, key: &str) -> Result<Option<IdempotencyRecord<R>>> {
        let key = normalize_key(key);
        let record: Option<IdempotencyRecord<R>> =
            self.inner.store.get_state(&record_key(&key)).await?;
        let now = self.inner.clock.now_millis();
        Ok(record.filter(|record| !record.is_expired(now)))
    }
}

impl Inner {
    async fn run_once<R, Fut, E>(
        self: Arc<Self>,
        key: String,
        handler: Fut,
    ) -> std::result::Result<Value, SharedError>
    where
        R: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: Error + Send + Sync + 'static,
    {
        // A record may have landed between the caller's lookup and registration
        let existing: Option<IdempotencyRecord<Value>> = self
            .store
            .get_state(&record_key(&key))
            .await
            .unwrap_or_else(|e| {
                warn!(key = %key, error = %e, "Unreadable idempotency record; executing");
                None
            });
        let now = self.clock.now_millis();
        if let Some(record) = existing.filter(|record| !record.is_expired(now)) {
            return Ok(record.response);
        }

        let response = handler.await.map_err(|e| Arc::new(e) as SharedError)?;
        let value = serde_json::to_value(&response).map_err(|e| Arc::new(e) as SharedError)?;

        let now = self.clock.now_millis();
        let ttl_ms = i64::try_from(self.config.ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        let record = IdempotencyRecord {
            key: key.clone(),
            response: value.clone(),
            created_at_iso: iso_timestamp(now),
            expires_at_unix_ms: now.saturating_add(ttl_ms),
        };
        if let Err(e) = self.store.set_state(&record_key(&key), &record).await {
            warn!(key = %key, error = %e, "Failed to persist idempotency record");
        }
        info!(
            namespace = %self.config.namespace,
            key = %key,
            expires_at = record.expires_at_unix_ms,
            "Idempotency record stored"
        );
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::idempotency::scoped_key;
    use crate::port::mocks::{FlakyStateBackend, ManualClock};
    use serde::Deserialize;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok, assert_pending};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct PaymentIntent {
        intent_id: String,
        amount_cents: u64,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("gateway declined: {0}")]
    struct GatewayDeclined(String);

    const T0: i64 = 1_700_000_000_000;

    fn store_at(clock: Arc<ManualClock>, ttl_seconds: u64) -> IdempotencyStore {
        IdempotencyStore::new(
            IdempotencyConfig::new("payment-service").with_ttl_seconds(ttl_seconds),
            StoreBackends::memory_only().with_clock(clock),
        )
        .unwrap()
    }

    fn create_intent(
        calls: Arc<AtomicUsize>,
    ) -> impl FnOnce() -> BoxFuture<'static, std::result::Result<PaymentIntent, GatewayDeclined>> {
        move || {
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(PaymentIntent {
                    intent_id: format!("pi_{n}"),
                    amount_cents: 2_450,
                })
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_execute_once() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = store_at(clock, 900);
        let calls = Arc::new(AtomicUsize::new(0));
        let key = scoped_key("create-intent", "cust1", "ord1", "key-abc");

        let (a, b) = tokio::join!(
            store.execute(&key, create_intent(calls.clone())),
            store.execute(&key, create_intent(calls.clone())),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(lock(&store.inner.in_flight).is_empty());
    }

    #[tokio::test]
    async fn test_sequential_replay_until_ttl_elapses() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = store_at(clock.clone(), 900);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = assert_ok!(store.execute("k1", create_intent(calls.clone())).await);
        clock.advance_millis(899_999);
        let second = assert_ok!(store.execute("k1", create_intent(calls.clone())).await);
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance_millis(1);
        assert!(store.get::<PaymentIntent>("k1").await.unwrap().is_none());
        let third = assert_ok!(store.execute("k1", create_intent(calls.clone())).await);
        assert_eq!(third.intent_id, "pi_2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_keys_are_normalized() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = store_at(clock, 300);
        let calls = Arc::new(AtomicUsize::new(0));

        store.execute("  Checkout:Cust1:ORD1:Key-ABC ", create_intent(calls.clone())).await.unwrap();
        store.execute("checkout:cust1:ord1:key-abc", create_intent(calls.clone())).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let record = store.get::<PaymentIntent>("CHECKOUT:CUST1:ORD1:KEY-ABC").await.unwrap().unwrap();
        assert_eq!(record.key, "checkout:cust1:ord1:key-abc");
        assert_eq!(record.created_at_iso, iso_timestamp(T0));
        assert_eq!(record.expires_at_unix_ms, T0 + 300_000);
    }

    #[tokio::test]
    async fn test_handler_error_reaches_every_waiter_and_is_retryable() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = store_at(clock, 900);
        let calls = Arc::new(AtomicUsize::new(0));

        let decline = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err::<PaymentIntent, _>(GatewayDeclined("insufficient funds".to_string()))
            }
        };

        let (a, b) = tokio::join!(
            store.execute("confirm:o1", decline(calls.clone())),
            store.execute("confirm:o1", decline(calls.clone())),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in [a, b] {
            let err = assert_err!(result);
            let original = err.handler_error::<GatewayDeclined>().expect("original error");
            assert_eq!(original.0, "insufficient funds");
        }

        assert!(store.get::<PaymentIntent>("confirm:o1").await.unwrap().is_none());
        store.execute("confirm:o1", create_intent(calls.clone())).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_starter_does_not_release_key() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(store_at(clock, 900));
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = |calls: Arc<AtomicUsize>| {
            move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, GatewayDeclined>(PaymentIntent {
                    intent_id: format!("pi_{n}"),
                    amount_cents: 900,
                })
            }
        };

        let starter = {
            let store = store.clone();
            let calls = calls.clone();
            tokio::spawn(async move { store.execute("refund:o9", slow(calls)).await })
        };
        while lock(&store.inner.in_flight).is_empty() {
            tokio::task::yield_now().await;
        }

        let mut joiner = tokio_test::task::spawn(store.execute("refund:o9", slow(calls.clone())));
        assert_pending!(joiner.poll());

        starter.abort();
        assert!(starter.await.unwrap_err().is_cancelled());
        assert_eq!(lock(&store.inner.in_flight).len(), 1, "execution still owns the key");

        let late = assert_ok!(store.execute("refund:o9", slow(calls.clone())).await);
        let joined = assert_ok!(joiner.await);
        assert_eq!(late, joined);
        assert_eq!(late.intent_id, "pi_1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(lock(&store.inner.in_flight).is_empty());
    }

    #[tokio::test]
    async fn test_handler_panic_frees_key() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = store_at(clock, 900);
        let calls = Arc::new(AtomicUsize::new(0));

        let err = assert_err!(
            store
                .execute("assign:o7", || async {
                    if true {
                        panic!("rider pool empty");
                    }
                    Ok::<u32, GatewayDeclined>(0)
                })
                .await
        );
        assert!(matches!(err, AppError::Handler(_)));
        assert!(lock(&store.inner.in_flight).is_empty());

        store.execute("assign:o7", create_intent(calls.clone())).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_caller_still_records_response() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = store_at(clock, 900);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut caller = tokio_test::task::spawn(store.execute("tip:o4", create_intent(calls.clone())));
        assert_pending!(caller.poll());
        drop(caller);

        while !lock(&store.inner.in_flight).is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let record = store.get::<PaymentIntent>("tip:o4").await.unwrap().expect("recorded");
        assert_eq!(record.response.intent_id, "pi_1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_records_survive_on_durable_backend() {
        let clock = Arc::new(ManualClock::new(T0));
        let backend = Arc::new(FlakyStateBackend::new());
        let backends = StoreBackends::memory_only()
            .with_durable(backend.clone())
            .with_clock(clock);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = IdempotencyStore::new(IdempotencyConfig::new("order-service"), backends.clone()).unwrap();
        first.execute("place:c1:o1:k", create_intent(calls.clone())).await.unwrap();
        assert!(backend
            .entry("order-service:idempotency", "key:place:c1:o1:k")
            .is_some());

        // a fresh instance (new process) replays from the backend
        let second = IdempotencyStore::new(IdempotencyConfig::new("order-service"), backends).unwrap();
        second.execute("place:c1:o1:k", create_intent(calls.clone())).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
