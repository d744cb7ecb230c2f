//! Failures raised while opening or migrating the SQLite store

use sqlx::migrate::MigrateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("cannot open sqlite store: {0}")]
    Open(String),

    #[error("schema migration failed: {0}")]
    Migrate(#[from] MigrateError),
}
