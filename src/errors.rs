//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Shellper socket communication failure.
    Ipc(String),
    /// The backing process for a session could not be started.
    Spawn(String),
    /// Request body or argument failed validation.
    Validation(String),
    /// Malformed cron expression or task definition.
    Cron(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Operation conflicts with current state.
    Conflict(String),
    /// Upstream dashboard or agent port could not be reached.
    Proxy(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::Cron(msg) => write!(f, "cron: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Proxy(msg) => write!(f, "proxy: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
