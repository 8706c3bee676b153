// Durable Job Queue - polling, exponential backoff, dead-lettering
//
// The whole queue lives in one snapshot document (`queue:<name>:state`) inside
// a `<namespace>:jobs` tiered store. A timer drives `tick`, which runs due jobs
// one at a time and writes the snapshot back once.

mod panic;
mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::constants::JOBS_NAMESPACE_SUFFIX;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::application::state_store::TieredStateStore;
use crate::domain::job::iso_timestamp;
use crate::domain::{DeadLetterRecord, JobRecord, QueueConfig, QueueSnapshot, QueueStatus};
use crate::error::Result;
use crate::port::{IdProvider, JobHandler, StoreBackends, TimeProvider, UuidProvider};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Outcome of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Another tick was still running; nothing was done
    pub skipped: bool,
    /// The tick errored before finishing; the message is in `QueueStatus::last_error`
    pub failed: bool,
    pub due: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn failed() -> Self {
        Self {
            failed: true,
            ..Self::default()
        }
    }
}

struct PollLoop {
    shutdown: ShutdownSender,
    handle: JoinHandle<()>,
}

/// At-least-once, single-process job queue with bounded retries and a bounded dead-letter list
pub struct DurableJobQueue<T> {
    inner: Arc<QueueInner<T>>,
    poll_loop: Mutex<Option<PollLoop>>,
}

struct QueueInner<T> {
    config: QueueConfig,
    retry: RetryPolicy,
    store: TieredStateStore,
    clock: Arc<dyn TimeProvider>,
    ids: Arc<dyn IdProvider>,
    handler: Mutex<Option<Arc<dyn JobHandler<T>>>>,
    processing: AtomicBool,
    /// Serializes snapshot read-modify-write between enqueue and the end of a tick
    snapshot_lock: tokio::sync::Mutex<()>,
    last_processed_at_iso: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the processing flag however the tick ends
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T> DurableJobQueue<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a queue. The backing store is `<namespace>:jobs`; nothing connects until first use.
    pub fn new(config: QueueConfig, backends: StoreBackends) -> Result<Self> {
        config.validate()?;
        let namespace = format!("{}:{}", config.namespace, JOBS_NAMESPACE_SUFFIX);
        let clock = Arc::clone(&backends.clock);

        Ok(Self {
            inner: Arc::new(QueueInner {
                retry: RetryPolicy::from_config(&config),
                config,
                store: TieredStateStore::new(namespace, backends),
                clock,
                ids: Arc::new(UuidProvider),
                handler: Mutex::new(None),
                processing: AtomicBool::new(false),
                snapshot_lock: tokio::sync::Mutex::new(()),
                last_processed_at_iso: Mutex::new(None),
                last_error: Mutex::new(None),
            }),
            poll_loop: Mutex::new(None),
        })
    }

    /// Replace the job id generator (call before the queue is shared)
    pub fn with_id_provider(mut self, ids: Arc<dyn IdProvider>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.ids = ids;
        }
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// The tiered store holding this queue's snapshot
    pub fn store(&self) -> &TieredStateStore {
        &self.inner.store
    }

    /// Add a job at the front of pending and persist the snapshot.
    /// `run_at_unix_ms` defaults to now.
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: T,
        run_at_unix_ms: Option<i64>,
    ) -> Result<JobRecord<T>> {
        let inner = &self.inner;
        let now = inner.clock.now_millis();
        let job = JobRecord::new(
            inner.ids.generate_id(),
            inner.config.queue_name.clone(),
            job_type,
            payload,
            run_at_unix_ms.unwrap_or(now),
            now,
        );

        let _write = inner.snapshot_lock.lock().await;
        let mut snapshot = inner.load_snapshot().await?;
        snapshot.pending.insert(0, job.clone());
        inner.save_snapshot(&snapshot).await?;

        info!(
            queue = %inner.config.queue_name,
            job_id = %job.id,
            job_type = %job.job_type,
            run_at = job.next_run_at_unix_ms,
            "Job enqueued"
        );
        Ok(job)
    }

    /// Register the handler used by `tick` without starting the timer
    pub fn set_handler<H>(&self, handler: H)
    where
        H: JobHandler<T> + 'static,
    {
        *lock(&self.inner.handler) = Some(Arc::new(handler));
    }

    /// Register the handler and start polling every `poll_interval_ms`.
    /// Calling `start` on a running queue only swaps the handler.
    /// Must be called from within a Tokio runtime.
    pub fn start<H>(&self, handler: H)
    where
        H: JobHandler<T> + 'static,
    {
        self.set_handler(handler);

        let mut poll_loop = lock(&self.poll_loop);
        if poll_loop.is_some() {
            warn!(queue = %self.inner.config.queue_name, "Queue already started; handler replaced");
            return;
        }

        let (shutdown, token) = shutdown_channel();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run(token).await });
        *poll_loop = Some(PollLoop { shutdown, handle });

        info!(
            queue = %self.inner.config.queue_name,
            poll_interval_ms = self.inner.config.poll_interval_ms,
            "Queue started"
        );
    }

    /// Stop polling. An in-flight tick (and its handler) runs to completion first.
    pub async fn stop(&self) {
        let poll_loop = lock(&self.poll_loop).take();
        let Some(PollLoop { shutdown, handle }) = poll_loop else {
            return;
        };
        shutdown.shutdown();
        if let Err(e) = handle.await {
            error!(queue = %self.inner.config.queue_name, error = %e, "Poll loop ended abnormally");
        }
        info!(queue = %self.inner.config.queue_name, "Queue stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.poll_loop).is_some()
    }

    /// Run every due job once. Overlapping calls are skipped, not queued.
    /// Errors never propagate: they set `failed` and the status's `last_error`.
    pub async fn tick(&self) -> TickReport {
        self.inner.tick().await
    }

    pub async fn get_status(&self) -> Result<QueueStatus> {
        let inner = &self.inner;
        let snapshot = inner.load_snapshot().await?;
        Ok(QueueStatus {
            queue_name: inner.config.queue_name.clone(),
            pending_count: snapshot.pending.len(),
            dead_letter_count: snapshot.dead_letters.len(),
            processing: inner.processing.load(Ordering::Acquire),
            poll_interval_ms: inner.config.poll_interval_ms,
            max_attempts: inner.config.max_attempts,
            last_processed_at_iso: lock(&inner.last_processed_at_iso).clone(),
            last_error: lock(&inner.last_error).clone(),
        })
    }

    /// Most recent first. A limit of 0 is treated as 1.
    pub async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRecord<T>>> {
        let mut snapshot = self.inner.load_snapshot().await?;
        snapshot.dead_letters.truncate(limit.max(1));
        Ok(snapshot.dead_letters)
    }

    /// Jobs waiting to run, newest-created first
    pub async fn list_pending(&self) -> Result<Vec<JobRecord<T>>> {
        Ok(self.inner.load_snapshot().await?.pending)
    }
}

impl<T> QueueInner<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) {
        let period = Duration::from_millis(self.config.poll_interval_ms);
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    debug!(queue = %self.config.queue_name, "Poll loop received shutdown");
                    break;
                }
                _ = interval.tick() => {
                    // a late tick may become ready in the same poll as the shutdown
                    if shutdown.is_shutdown() {
                        break;
                    }
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) -> TickReport {
        let Some(_processing) = ProcessingGuard::acquire(&self.processing) else {
            debug!(queue = %self.config.queue_name, "Tick already in progress; skipped");
            return TickReport::skipped();
        };

        match self.process_due_jobs().await {
            Ok(report) => report,
            Err(e) => {
                error!(queue = %self.config.queue_name, error = %e, "Queue tick failed");
                *lock(&self.last_error) = Some(e.to_string());
                TickReport::failed()
            }
        }
    }

    async fn process_due_jobs(&self) -> Result<TickReport> {
        let handler = lock(&self.handler).clone();
        let Some(handler) = handler else {
            debug!(queue = %self.config.queue_name, "No handler registered; tick is a no-op");
            return Ok(TickReport::default());
        };

        let now = self.clock.now_millis();
        let snapshot = self.load_snapshot().await?;
        let mut due: Vec<JobRecord<T>> = snapshot
            .pending
            .into_iter()
            .filter(|job| job.is_due(now))
            .collect();
        if due.is_empty() {
            return Ok(TickReport::default());
        }
        // stable: equal due times keep insertion order
        due.sort_by_key(|job| job.next_run_at_unix_ms);

        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };
        let due_ids: HashSet<String> = due.iter().map(|job| job.id.clone()).collect();
        let mut requeued = Vec::new();
        let mut dead_letters = Vec::new();

        for mut job in due {
            let outcome = run_handler(Arc::clone(&handler), job.clone()).await;
            let Err(message) = outcome else {
                debug!(queue = %self.config.queue_name, job_id = %job.id, "Job succeeded");
                report.succeeded += 1;
                continue;
            };

            let failed_at = self.clock.now_millis();
            let attempt = job.record_failure(message.clone(), failed_at);
            match self.retry.decide(attempt) {
                RetryDecision::Retry(delay_ms) => {
                    let delay = i64::try_from(delay_ms).unwrap_or(i64::MAX);
                    job.next_run_at_unix_ms = failed_at.saturating_add(delay);
                    info!(
                        queue = %self.config.queue_name,
                        job_id = %job.id,
                        attempt,
                        delay_ms,
                        error = %message,
                        "Job failed; retrying"
                    );
                    report.retried += 1;
                    requeued.push(job);
                }
                RetryDecision::DeadLetter => {
                    warn!(
                        queue = %self.config.queue_name,
                        job_id = %job.id,
                        attempt,
                        error = %message,
                        "Job exhausted attempts; dead-lettered"
                    );
                    report.dead_lettered += 1;
                    dead_letters.push(job.into_dead_letter(failed_at));
                }
            }
        }

        // Re-read so jobs enqueued while handlers ran survive the write
        let _write = self.snapshot_lock.lock().await;
        let mut fresh = self.load_snapshot().await?;
        fresh.pending.retain(|job| !due_ids.contains(&job.id));
        fresh.pending.extend(requeued);
        fresh.sort_pending_newest_first();
        for record in dead_letters {
            fresh.push_dead_letter(record, self.config.dead_letter_limit);
        }
        self.save_snapshot(&fresh).await?;

        *lock(&self.last_processed_at_iso) = Some(iso_timestamp(self.clock.now_millis()));
        *lock(&self.last_error) = None;
        Ok(report)
    }

    async fn load_snapshot(&self) -> Result<QueueSnapshot<T>> {
        Ok(self
            .store
            .get_state(&self.config.state_key())
            .await?
            .unwrap_or_default())
    }

    async fn save_snapshot(&self, snapshot: &QueueSnapshot<T>) -> Result<()> {
        self.store.set_state(&self.config.state_key(), snapshot).await
    }
}

/// Run one handler invocation on its own task so a panic fails the attempt, not the loop
async fn run_handler<T>(
    handler: Arc<dyn JobHandler<T>>,
    job: JobRecord<T>,
) -> std::result::Result<(), String>
where
    T: Send + 'static,
{
    match tokio::spawn(async move { handler.handle(job).await }).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(join_err) => Err(panic::describe_join_error(join_err)),
    }
}
