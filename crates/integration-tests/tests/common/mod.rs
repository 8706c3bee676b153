// Shared fixtures: a file-backed SQLite durable tier and a manual clock
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tiffin_core::error::{AppError, Result};
use tiffin_core::port::mocks::ManualClock;
use tiffin_core::{StateBackend, StoreBackends};
use tiffin_infra_sqlite::SqliteStateBackend;

pub const T0: i64 = 1_700_000_000_000;

pub struct Fixture {
    /// Keeps the database directory alive for the test
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub sqlite: Arc<SwitchableBackend>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let sqlite = Arc::new(SwitchableBackend::new(SqliteStateBackend::new(db_url(&dir))));
        Self {
            dir,
            clock: Arc::new(ManualClock::new(T0)),
            sqlite,
        }
    }

    pub fn backends(&self) -> StoreBackends {
        StoreBackends::memory_only()
            .with_durable(self.sqlite.clone())
            .with_clock(self.clock.clone())
    }

    /// Backends over a fresh connection to the same database, as a restarted process would see it
    pub fn reopened_backends(&self) -> StoreBackends {
        StoreBackends::memory_only()
            .with_durable(Arc::new(SqliteStateBackend::new(db_url(&self.dir))))
            .with_clock(self.clock.clone())
    }
}

pub fn db_url(dir: &TempDir) -> String {
    format!("sqlite://{}/state.db", dir.path().display())
}

/// Real SQLite backend that can be switched off to simulate an outage
pub struct SwitchableBackend {
    inner: SqliteStateBackend,
    down: AtomicBool,
}

impl SwitchableBackend {
    pub fn new(inner: SqliteStateBackend) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AppError::Backend("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateBackend for SwitchableBackend {
    async fn connect(&self) -> Result<()> {
        self.check()?;
        self.inner.connect().await
    }

    async fn load(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.load(namespace, key).await
    }

    async fn store(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner.store(namespace, key, value).await
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
