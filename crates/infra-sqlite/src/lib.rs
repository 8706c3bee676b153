// Tiffin Infrastructure - SQLite Adapter
// Implements: StateBackend (durable tier of the tiered state store)

mod connection;
mod error;
mod migration;
mod state_backend;

pub use connection::create_pool;
pub use migration::run_migrations;
pub use state_backend::SqliteStateBackend;

// Note: sqlx::Error conversion is handled by `error::map_sqlx_error`
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
