//! Database connection management

use std::{path::Path, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use chat3d_config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::fs;
use tracing::info;

/// Open the SQLite pool described by `config`.
///
/// Every pooled connection enforces foreign keys, runs in WAL mode and waits
/// up to five seconds on a locked database.
pub async fn prepare_database(config: &DatabaseConfig) -> Result<SqlitePool> {
    if !config.url.starts_with("sqlite:") {
        anyhow::bail!(
            "failed to connect to database {}: only sqlite urls are supported",
            config.url
        );
    }

    ensure_sqlite_directory(&config.url).await?;

    let options = SqliteConnectOptions::from_str(&config.url)
        .with_context(|| format!("failed to connect to database {}", config.url))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to connect to database {}", config.url))?;

    info!(url = %config.url, "database connection established");
    Ok(pool)
}

async fn ensure_sqlite_directory(url: &str) -> Result<()> {
    let Some(sqlite_path) = url.strip_prefix("sqlite://") else {
        return Ok(());
    };

    if sqlite_path.starts_with(":memory:") {
        return Ok(());
    }

    let path = Path::new(sqlite_path.split('?').next().unwrap_or(sqlite_path));
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("failed to create sqlite directory {}", parent.display())
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_missing_directories_and_file() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/dir/test.db");

        let config = DatabaseConfig {
            url: format!("sqlite://{}", db_path.display()),
            max_connections: 1,
        };

        let pool = prepare_database(&config).await.unwrap();
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn opens_in_memory_database() {
        let config = DatabaseConfig {
            url: "sqlite://:memory:".to_string(),
            max_connections: 1,
        };

        let pool = prepare_database(&config).await.unwrap();
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_non_sqlite_urls() {
        let config = DatabaseConfig {
            url: "postgres://localhost/chat3d".to_string(),
            max_connections: 1,
        };

        let error = prepare_database(&config).await.unwrap_err();
        assert!(error.to_string().contains("failed to connect to database"));
    }
}
