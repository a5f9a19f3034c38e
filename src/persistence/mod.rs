//! Persistence layer modules.

pub mod builder_repo;
pub mod cron_repo;
pub mod db;
pub mod file_tab_repo;
pub mod registration_repo;
pub mod schema;
pub mod terminal_repo;
pub mod workspace_repo;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
