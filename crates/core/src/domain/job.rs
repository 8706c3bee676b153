// Job Domain Model
//
// Field names serialize in camelCase so a queue snapshot written by any
// service instance reads back identically: `nextRunAtUnixMs`, `createdAtIso`, ...

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Job ID (`job_<uuid>`)
pub type JobId = String;

/// Render epoch milliseconds as an RFC 3339 UTC timestamp with millisecond precision
pub fn iso_timestamp(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A unit of work owned by exactly one queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord<T> {
    pub id: JobId,
    pub queue_name: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: T,
    /// Failed executions so far; never decreases
    pub attempt: u32,
    pub next_run_at_unix_ms: i64,
    pub created_at_iso: String,
    pub updated_at_iso: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl<T> JobRecord<T> {
    /// Create a fresh job (attempt 0)
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `queue_name` - Owning queue
    /// * `job_type` - Caller-defined discriminator (e.g. `push.dispatch`)
    /// * `payload` - Opaque payload; shape is the caller's responsibility
    /// * `run_at_unix_ms` - Earliest execution time
    /// * `now_millis` - Creation time (injected, not system time)
    pub fn new(
        id: impl Into<String>,
        queue_name: impl Into<String>,
        job_type: impl Into<String>,
        payload: T,
        run_at_unix_ms: i64,
        now_millis: i64,
    ) -> Self {
        let now_iso = iso_timestamp(now_millis);
        Self {
            id: id.into(),
            queue_name: queue_name.into(),
            job_type: job_type.into(),
            payload,
            attempt: 0,
            next_run_at_unix_ms: run_at_unix_ms,
            created_at_iso: now_iso.clone(),
            updated_at_iso: now_iso,
            last_error: None,
        }
    }

    pub fn is_due(&self, now_millis: i64) -> bool {
        self.next_run_at_unix_ms <= now_millis
    }

    /// Record one failed execution. Returns the new attempt count.
    pub fn record_failure(&mut self, error: impl Into<String>, now_millis: i64) -> u32 {
        self.attempt += 1;
        self.last_error = Some(error.into());
        self.updated_at_iso = iso_timestamp(now_millis);
        self.attempt
    }

    /// Move the job into the terminal dead-letter list
    pub fn into_dead_letter(self, now_millis: i64) -> DeadLetterRecord<T> {
        DeadLetterRecord {
            job: self,
            failed_at_iso: iso_timestamp(now_millis),
        }
    }
}

/// Snapshot of a job that exhausted its attempts. Terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord<T> {
    #[serde(flatten)]
    pub job: JobRecord<T>,
    pub failed_at_iso: String,
}

/// Entire persisted state of one queue (a single document per queue name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot<T> {
    #[serde(default = "Vec::new")]
    pub pending: Vec<JobRecord<T>>,
    #[serde(default = "Vec::new")]
    pub dead_letters: Vec<DeadLetterRecord<T>>,
}

impl<T> Default for QueueSnapshot<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            dead_letters: Vec::new(),
        }
    }
}

impl<T> QueueSnapshot<T> {
    /// Insert at the front (most recent first) and drop the oldest beyond `limit`
    pub fn push_dead_letter(&mut self, record: DeadLetterRecord<T>, limit: usize) {
        self.dead_letters.insert(0, record);
        self.dead_letters.truncate(limit);
    }

    /// Newest-created first. Stable, so jobs created in the same millisecond keep their order.
    pub fn sort_pending_newest_first(&mut self) {
        self.pending
            .sort_by(|a, b| b.created_at_iso.cmp(&a.created_at_iso));
    }
}

/// Point-in-time view of a queue for operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue_name: String,
    pub pending_count: usize,
    pub dead_letter_count: usize,
    pub processing: bool,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_at_iso: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
