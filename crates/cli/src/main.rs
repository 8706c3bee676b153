//! Tiffin CLI - operator access to queue snapshots, state, cache and idempotency records
//!
//! Talks to the same SQLite (and optional Redis) backends the services use.

mod logging;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tabled::{Table, Tabled};
use tiffin_core::application::constants::DEFAULT_DEAD_LETTER_PAGE;
use tiffin_core::application::state_store::Tier;
use tiffin_core::domain::job::iso_timestamp;
use tiffin_core::{
    DurableJobQueue, IdempotencyConfig, IdempotencyStore, QueueConfig, StoreBackends,
    TieredStateStore,
};
use tiffin_infra_redis::RedisCacheBackend;
use tiffin_infra_sqlite::SqliteStateBackend;
use tracing::{debug, warn};

const DEFAULT_DB_PATH: &str = "~/.tiffin/state.db";
const DEFAULT_CACHE_TTL_SECONDS: u64 = 30;

#[derive(Parser)]
#[command(name = "tiffin")]
#[command(about = "Inspect and operate Tiffin queues, state and idempotency records", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database holding durable state
    #[arg(long, env = "TIFFIN_DB_PATH", default_value = DEFAULT_DB_PATH, global = true)]
    db: String,

    /// Redis URL for the cache tier (cache commands use memory when unset)
    #[arg(long, env = "REDIS_URL", global = true)]
    redis_url: Option<String>,

    /// Log format: json or pretty
    #[arg(long, env = "TIFFIN_LOG_FORMAT", default_value = "pretty", global = true)]
    log_format: String,

    /// Print raw JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Durable job queues
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },

    /// Durable key/value state
    State {
        #[command(subcommand)]
        command: StateCommand,
    },

    /// Ephemeral TTL cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Idempotency records
    Idempotency {
        #[command(subcommand)]
        command: IdempotencyCommand,
    },
}

#[derive(Args)]
struct QueueTarget {
    /// Owning service namespace (e.g. order-service)
    #[arg(long)]
    namespace: String,

    /// Queue name (e.g. push-delivery)
    #[arg(long)]
    queue: String,
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Show pending and dead-letter counts
    Status {
        #[command(flatten)]
        target: QueueTarget,
    },

    /// List dead-lettered jobs, most recent first
    DeadLetters {
        #[command(flatten)]
        target: QueueTarget,

        #[arg(short = 'n', long, default_value_t = DEFAULT_DEAD_LETTER_PAGE)]
        limit: usize,
    },

    /// Add a job to a queue
    Enqueue {
        #[command(flatten)]
        target: QueueTarget,

        /// Job type (e.g. push.dispatch)
        #[arg(short, long)]
        job_type: String,

        /// Payload as JSON string
        #[arg(long)]
        payload: String,

        /// Earliest run time, epoch milliseconds (default: now)
        #[arg(long)]
        run_at: Option<i64>,
    },
}

#[derive(Subcommand)]
enum StateCommand {
    Get {
        #[arg(long)]
        namespace: String,
        key: String,
    },
    Set {
        #[arg(long)]
        namespace: String,
        key: String,
        /// Value as JSON
        value: String,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    Get {
        #[arg(long)]
        namespace: String,
        key: String,
    },
    Set {
        #[arg(long)]
        namespace: String,
        key: String,
        value: String,
        #[arg(long, default_value_t = DEFAULT_CACHE_TTL_SECONDS)]
        ttl: u64,
    },
}

#[derive(Subcommand)]
enum IdempotencyCommand {
    /// Show the unexpired record for a key
    Get {
        #[arg(long)]
        namespace: String,
        key: String,
    },
}

#[derive(Tabled)]
struct FieldRow {
    field: &'static str,
    value: String,
}

#[derive(Tabled)]
struct DeadLetterRow {
    id: String,
    #[tabled(rename = "type")]
    job_type: String,
    attempt: u32,
    failed_at: String,
    last_error: String,
}

#[derive(Tabled)]
struct JobRow {
    id: String,
    #[tabled(rename = "type")]
    job_type: String,
    queue: String,
    run_at: String,
}

/// Accept a plain path or a full `sqlite:` URL; plain paths are tilde-expanded
fn sqlite_url(db: &str) -> String {
    if db.starts_with("sqlite:") {
        db.to_string()
    } else {
        format!("sqlite://{}", shellexpand::tilde(db))
    }
}

/// Match the collaborator presets so status shows their real settings
fn queue_config(target: &QueueTarget) -> QueueConfig {
    match target.queue.as_str() {
        "push-delivery" => QueueConfig::push_delivery(target.namespace.as_str()),
        "payout-reconcile" => QueueConfig::payout_reconcile(target.namespace.as_str()),
        other => QueueConfig::new(target.namespace.as_str(), other),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// The CLI is useless without the durable tier; a missing cache tier only warns
async fn require_durable(store: &TieredStateStore) -> Result<()> {
    if let Err(degraded) = store.init().await {
        if degraded.failures.iter().any(|f| f.tier == Tier::Durable) {
            bail!("{degraded}");
        }
        warn!(error = %degraded, "Continuing without cache backend");
    }
    Ok(())
}

struct Backends {
    sqlite: Arc<SqliteStateBackend>,
    store: StoreBackends,
}

impl Backends {
    fn open(cli: &Cli) -> Result<Self> {
        let url = sqlite_url(&cli.db);
        if let Some(path) = url.strip_prefix("sqlite://") {
            if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }
        debug!(url = %url, "Opening durable backend");

        let sqlite = Arc::new(SqliteStateBackend::new(url));
        let mut store = StoreBackends::memory_only().with_durable(sqlite.clone());
        if let Some(redis_url) = &cli.redis_url {
            let redis = RedisCacheBackend::new(redis_url).context("Invalid REDIS_URL")?;
            store = store.with_cache(Arc::new(redis));
        }
        Ok(Self { sqlite, store })
    }
}

async fn run_queue(command: QueueCommand, backends: &Backends, json: bool) -> Result<()> {
    match command {
        QueueCommand::Status { target } => {
            let queue: DurableJobQueue<Value> =
                DurableJobQueue::new(queue_config(&target), backends.store.clone())?;
            require_durable(queue.store()).await?;
            let status = queue.get_status().await?;

            if json {
                return print_json(&status);
            }
            println!("{}", format!("Queue {}", status.queue_name).cyan().bold());
            let rows = vec![
                FieldRow { field: "namespace", value: target.namespace },
                FieldRow { field: "pending", value: status.pending_count.to_string() },
                FieldRow { field: "dead letters", value: status.dead_letter_count.to_string() },
                FieldRow { field: "poll interval (ms)", value: status.poll_interval_ms.to_string() },
                FieldRow { field: "max attempts", value: status.max_attempts.to_string() },
            ];
            println!("{}", Table::new(rows));
        }

        QueueCommand::DeadLetters { target, limit } => {
            let queue: DurableJobQueue<Value> =
                DurableJobQueue::new(queue_config(&target), backends.store.clone())?;
            require_durable(queue.store()).await?;
            let dead = queue.list_dead_letters(limit).await?;

            if json {
                return print_json(&dead);
            }
            if dead.is_empty() {
                println!("{}", "No dead letters".green());
                return Ok(());
            }
            println!(
                "{}",
                format!("{} dead letter(s) in {}", dead.len(), target.queue).red().bold()
            );
            let rows: Vec<DeadLetterRow> = dead
                .into_iter()
                .map(|d| DeadLetterRow {
                    id: d.job.id,
                    job_type: d.job.job_type,
                    attempt: d.job.attempt,
                    failed_at: d.failed_at_iso,
                    last_error: d.job.last_error.unwrap_or_default(),
                })
                .collect();
            println!("{}", Table::new(rows));
        }

        QueueCommand::Enqueue {
            target,
            job_type,
            payload,
            run_at,
        } => {
            let payload: Value = serde_json::from_str(&payload).context("Invalid JSON payload")?;
            let queue: DurableJobQueue<Value> =
                DurableJobQueue::new(queue_config(&target), backends.store.clone())?;
            require_durable(queue.store()).await?;
            let job = queue.enqueue(&job_type, payload, run_at).await?;

            if json {
                return print_json(&job);
            }
            println!("{}", "✓ Job enqueued".green().bold());
            println!();
            let row = JobRow {
                id: job.id,
                job_type: job.job_type,
                queue: job.queue_name,
                run_at: iso_timestamp(job.next_run_at_unix_ms),
            };
            println!("{}", Table::new(vec![row]));
        }
    }
    Ok(())
}

async fn run_state(command: StateCommand, backends: &Backends, json: bool) -> Result<()> {
    match command {
        StateCommand::Get { namespace, key } => {
            let store = TieredStateStore::new(namespace, backends.store.clone());
            require_durable(&store).await?;
            match store.get_state::<Value>(&key).await? {
                Some(value) => print_json(&value)?,
                None if json => println!("null"),
                None => println!("{}", format!("No state for {key}").yellow()),
            }
        }
        StateCommand::Set { namespace, key, value } => {
            let value: Value = serde_json::from_str(&value).context("Invalid JSON value")?;
            let store = TieredStateStore::new(namespace, backends.store.clone());
            require_durable(&store).await?;
            store.set_state(&key, &value).await?;
            if !json {
                println!("{}", format!("✓ {key} saved").green().bold());
            }
        }
    }
    Ok(())
}

async fn run_cache(command: CacheCommand, backends: &Backends, json: bool) -> Result<()> {
    match command {
        CacheCommand::Get { namespace, key } => {
            let store = TieredStateStore::new(namespace, backends.store.clone());
            require_durable(&store).await?;
            let value = store.get_cache(&key).await;
            match (value, json) {
                (value, true) => print_json(&value)?,
                (Some(value), false) => println!("{value}"),
                (None, false) => println!("{}", format!("Cache miss for {key}").yellow()),
            }
        }
        CacheCommand::Set { namespace, key, value, ttl } => {
            let store = TieredStateStore::new(namespace, backends.store.clone());
            require_durable(&store).await?;
            if store.tier_status().await.cache != tiffin_core::TierHealth::Healthy {
                warn!("No reachable cache backend; the entry lives only for this command");
            }
            store.set_cache(&key, &value, ttl).await;
            if !json {
                println!("{}", format!("✓ {key} cached for {ttl}s").green().bold());
            }
        }
    }
    Ok(())
}

async fn run_idempotency(command: IdempotencyCommand, backends: &Backends, json: bool) -> Result<()> {
    match command {
        IdempotencyCommand::Get { namespace, key } => {
            let store = IdempotencyStore::new(IdempotencyConfig::new(namespace), backends.store.clone())?;
            require_durable(store.store()).await?;
            let record = store.get::<Value>(&key).await?;

            if json {
                return print_json(&record);
            }
            let Some(record) = record else {
                println!("{}", format!("No unexpired record for {key}").yellow());
                return Ok(());
            };
            let rows = vec![
                FieldRow { field: "key", value: record.key },
                FieldRow { field: "created", value: record.created_at_iso },
                FieldRow { field: "expires", value: iso_timestamp(record.expires_at_unix_ms) },
                FieldRow { field: "response", value: record.response.to_string() },
            ];
            println!("{}", Table::new(rows));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_format)?;

    let backends = Backends::open(&cli)?;
    let json = cli.json;

    let result = match cli.command {
        Commands::Queue { command } => run_queue(command, &backends, json).await,
        Commands::State { command } => run_state(command, &backends, json).await,
        Commands::Cache { command } => run_cache(command, &backends, json).await,
        Commands::Idempotency { command } => run_idempotency(command, &backends, json).await,
    };

    backends.sqlite.close().await;
    result
}
