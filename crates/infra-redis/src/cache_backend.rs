//! Redis-backed cache tier.
//!
//! Entries are plain strings written with `SET key value EX ttl`, so Redis
//! expires them on its own; reads are a single `GET`.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tiffin_core::error::{AppError, Result};
use tiffin_core::port::CacheBackend;
use tokio::sync::OnceCell;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RedisCacheError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Redis cache is not connected")]
    NotConnected,
}

impl From<RedisCacheError> for AppError {
    fn from(err: RedisCacheError) -> Self {
        AppError::Backend(err.to_string())
    }
}

#[derive(Debug)]
pub struct RedisCacheBackend {
    client: redis::Client,
    conn: OnceCell<MultiplexedConnection>,
}

impl RedisCacheBackend {
    /// Parse the URL (e.g. `redis://localhost:6379`). No connection is made until `connect`.
    pub fn new(redis_url: impl AsRef<str>) -> std::result::Result<Self, RedisCacheError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisCacheError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
        })
    }

    fn connection(&self) -> std::result::Result<MultiplexedConnection, RedisCacheError> {
        self.conn.get().cloned().ok_or(RedisCacheError::NotConnected)
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn connect(&self) -> Result<()> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| RedisCacheError::Connection(e.to_string()))
            })
            .await?;

        let mut conn = conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisCacheError::Connection(e.to_string()))?;
        debug!("Redis cache backend ready");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection()?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisCacheError::Command(e.to_string()))?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.connection()?;

        // Redis rejects `EX 0`; a zero TTL means the entry is already gone
        if ttl_seconds == 0 {
            let _: u64 = redis::cmd("DEL")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| RedisCacheError::Command(e.to_string()))?;
            return Ok(());
        }

        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisCacheError::Command(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
