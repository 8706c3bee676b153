//! Idempotency store over a real SQLite durable tier

mod common;

use common::{Fixture, T0};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiffin_core::domain::idempotency::scoped_key;
use tiffin_core::{IdempotencyConfig, IdempotencyStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderRecord {
    order_id: String,
    customer_id: String,
    total_cents: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("inventory reservation failed for {0}")]
struct ReservationFailed(String);

/// Stand-in for the order service: every call creates a new order
#[derive(Default)]
struct OrderBook {
    created: AtomicUsize,
}

impl OrderBook {
    async fn create_order(&self, customer_id: &str) -> Result<OrderRecord, ReservationFailed> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(OrderRecord {
            order_id: format!("ord_{n}"),
            customer_id: customer_id.to_string(),
            total_cents: 1_899,
        })
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

fn checkout(book: &Arc<OrderBook>) -> impl FnOnce() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<OrderRecord, ReservationFailed>> + Send>> {
    let book = book.clone();
    move || Box::pin(async move { book.create_order("cust1").await })
}

#[tokio::test]
async fn test_scenario_c_duplicate_checkout_creates_one_order() {
    let fx = Fixture::new();
    let store = IdempotencyStore::new(
        IdempotencyConfig::new("order-service").with_ttl_seconds(1_800),
        fx.backends(),
    )
    .unwrap();
    let book = Arc::new(OrderBook::default());

    let (first, second) = tokio::join!(
        store.execute("checkout:cust1:ord1:key-abc", checkout(&book)),
        store.execute("checkout:cust1:ord1:key-abc", checkout(&book)),
    );

    assert_eq!(book.created(), 1);
    let first = first.unwrap();
    assert_eq!(first, second.unwrap());
    assert_eq!(first.order_id, "ord_1");

    // a late retry of the same request replays the stored order
    let replay = store.execute("checkout:cust1:ord1:key-abc", checkout(&book)).await.unwrap();
    assert_eq!(replay, first);
    assert_eq!(book.created(), 1);
}

#[tokio::test]
async fn test_replay_expires_after_ttl() {
    let fx = Fixture::new();
    let store = IdempotencyStore::new(
        IdempotencyConfig::new("payment-service").with_ttl_seconds(900),
        fx.backends(),
    )
    .unwrap();
    let book = Arc::new(OrderBook::default());
    let key = scoped_key("confirm-payment", "cust1", "pay_9", "k-1");

    store.execute(&key, checkout(&book)).await.unwrap();
    fx.clock.advance_secs(899);
    store.execute(&key, checkout(&book)).await.unwrap();
    assert_eq!(book.created(), 1);

    fx.clock.advance_secs(1);
    assert!(store.get::<OrderRecord>(&key).await.unwrap().is_none());
    let again = store.execute(&key, checkout(&book)).await.unwrap();
    assert_eq!(again.order_id, "ord_2");

    let record = store.get::<OrderRecord>(&key).await.unwrap().unwrap();
    assert_eq!(record.expires_at_unix_ms, T0 + 900_000 + 900_000);
}

#[tokio::test]
async fn test_failure_propagates_and_leaves_key_retryable() {
    let fx = Fixture::new();
    let store = IdempotencyStore::new(IdempotencyConfig::new("order-service"), fx.backends()).unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));

    let failing = |attempts: Arc<AtomicUsize>| {
        move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<OrderRecord, _>(ReservationFailed("sku-42".to_string()))
        }
    };

    let (a, b) = tokio::join!(
        store.execute("checkout:cust2:ord7:k", failing(attempts.clone())),
        store.execute("checkout:cust2:ord7:k", failing(attempts.clone())),
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    for result in [a, b] {
        let err = result.unwrap_err();
        let original = err.handler_error::<ReservationFailed>().expect("original error kept");
        assert_eq!(original.0, "sku-42");
    }
    assert!(store.get::<OrderRecord>("checkout:cust2:ord7:k").await.unwrap().is_none());

    let book = Arc::new(OrderBook::default());
    store.execute("checkout:cust2:ord7:k", checkout(&book)).await.unwrap();
    assert_eq!(book.created(), 1);
}

#[tokio::test]
async fn test_record_replays_after_restart() {
    let fx = Fixture::new();
    let book = Arc::new(OrderBook::default());

    let before = IdempotencyStore::new(IdempotencyConfig::new("order-service"), fx.backends()).unwrap();
    let original = before.execute("Checkout:Cust1:Ord1:KEY", checkout(&book)).await.unwrap();

    let after = IdempotencyStore::new(IdempotencyConfig::new("order-service"), fx.reopened_backends()).unwrap();
    let replayed = after.execute("checkout:cust1:ord1:key", checkout(&book)).await.unwrap();

    assert_eq!(replayed, original);
    assert_eq!(book.created(), 1);
}
