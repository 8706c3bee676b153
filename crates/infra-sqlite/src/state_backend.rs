// SQLite StateBackend Implementation

use crate::error::map_sqlx_error;
use crate::{create_pool, run_migrations};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tiffin_core::error::{AppError, Result};
use tiffin_core::port::StateBackend;
use tokio::sync::OnceCell;
use tracing::debug;

/// Durable tier over a single `app_state(namespace, key, value_json, updated_at)` table.
///
/// The pool is opened lazily by `connect`, so constructing the backend never fails;
/// an unreachable database surfaces as a degraded tier in the store's `init`.
pub struct SqliteStateBackend {
    database_url: String,
    pool: OnceCell<SqlitePool>,
}

impl SqliteStateBackend {
    /// e.g. `sqlite:///home/me/.tiffin/state.db`
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            pool: OnceCell::new(),
        }
    }

    /// Close the pool, if it was opened
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .get()
            .ok_or_else(|| AppError::Backend("sqlite backend is not connected".to_string()))
    }
}

#[async_trait]
impl StateBackend for SqliteStateBackend {
    async fn connect(&self) -> Result<()> {
        let pool = self
            .pool
            .get_or_try_init(|| create_pool(&self.database_url))
            .await?;
        run_migrations(pool).await?;
        debug!(url = %self.database_url, "SQLite state backend ready");
        Ok(())
    }

    async fn load(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT value_json FROM app_state WHERE namespace = ? AND key = ?",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(self.pool()?)
        .await
        .map_err(map_sqlx_error)
    }

    async fn store(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO app_state (namespace, key, value_json, updated_at)
            VALUES (?, ?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            ON CONFLICT(namespace, key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .execute(self.pool()?)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tiffin_core::{StoreBackends, TierHealth, TieredStateStore};

    fn db_url(dir: &tempfile::TempDir) -> String {
        format!("sqlite://{}/state.db", dir.path().display())
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteStateBackend::new(db_url(&dir));
        backend.connect().await.unwrap();

        assert_eq!(backend.load("auth-service", "session:1").await.unwrap(), None);
        backend.store("auth-service", "session:1", r#"{"u":1}"#).await.unwrap();
        backend.store("auth-service", "session:1", r#"{"u":2}"#).await.unwrap();
        backend.store("other-service", "session:1", r#"{"u":3}"#).await.unwrap();

        assert_eq!(
            backend.load("auth-service", "session:1").await.unwrap().as_deref(),
            Some(r#"{"u":2}"#)
        );
        assert_eq!(
            backend.load("other-service", "session:1").await.unwrap().as_deref(),
            Some(r#"{"u":3}"#)
        );
    }

    #[tokio::test]
    async fn test_calls_before_connect_fail() {
        let backend = SqliteStateBackend::new("sqlite::memory:");
        let err = backend.load("ns", "k").await.unwrap_err();
        assert!(matches!(err, AppError::Backend(_)));
    }

    #[tokio::test]
    async fn test_connect_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteStateBackend::new(db_url(&dir));
        backend.connect().await.unwrap();
        backend.connect().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_database_degrades_store() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/no/such/dir/state.db", dir.path().display());
        let store = TieredStateStore::new(
            "auth-service",
            StoreBackends::memory_only().with_durable(Arc::new(SqliteStateBackend::new(url))),
        );

        let degraded = store.init().await.unwrap_err();
        assert_eq!(degraded.failures[0].backend, "sqlite");
        assert_eq!(store.tier_status().await.durable, TierHealth::Degraded);

        store.set_state("users:v1", &json!({"a": 1})).await.unwrap();
        let users: Option<serde_json::Value> = store.get_state("users:v1").await.unwrap();
        assert_eq!(users, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_state_survives_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SqliteStateBackend::new(db_url(&dir)));

        let first = TieredStateStore::new(
            "catalog-service",
            StoreBackends::memory_only().with_durable(backend.clone()),
        );
        first.set_state("menu:v1", &json!(["dal", "roti"])).await.unwrap();
        backend.close().await;

        let reopened = Arc::new(SqliteStateBackend::new(db_url(&dir)));
        let second = TieredStateStore::new(
            "catalog-service",
            StoreBackends::memory_only().with_durable(reopened),
        );
        let menu: Option<serde_json::Value> = second.get_state("menu:v1").await.unwrap();
        assert_eq!(menu, Some(json!(["dal", "roti"])));
    }
}
