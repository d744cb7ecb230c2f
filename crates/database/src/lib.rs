//! Chat3D Database Crate
//!
//! Connection management and embedded schema migrations for the SQLite store.
//! Queries live next to the services that own them.

use sqlx::SqlitePool;
use chat3d_config::DatabaseConfig;

pub mod connection;
pub mod migrations;
pub mod types;

pub use connection::prepare_database;
pub use migrations::{run_migrations, MIGRATOR};
pub use types::{errors::DatabaseError, DatabaseResult};

/// Initialize the database with migrations
pub async fn initialize_database(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| DatabaseError::Open(format!("{e:#}")))?;

    run_migrations(&pool).await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_database() -> (SqlitePool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let config = DatabaseConfig {
            url: format!("sqlite://{}", db_path.display()),
            max_connections: 1,
        };

        let pool = initialize_database(&config).await.unwrap();
        (pool, temp_dir)
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let (pool, _temp_dir) = create_test_database().await;

        let result: (bool,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert!(result.0);
    }

    #[tokio::test]
    async fn test_context_delete_cascades_to_items() {
        let (pool, _temp_dir) = create_test_database().await;
        let now = "2024-06-01T00:00:00.000000Z";

        let user_id = sqlx::query(
            "INSERT INTO users (public_id, email, created_at, updated_at) VALUES ('u1', 'a@example.com', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();

        let context_id = sqlx::query(
            "INSERT INTO chat_contexts (public_id, user_id, name, created_at, updated_at) VALUES ('c1', ?, 'bracket', ?, ?)",
        )
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();

        sqlx::query(
            "INSERT INTO chat_items (public_id, context_id, role, segments, created_at, updated_at) VALUES ('i1', ?, 'user', '[]', ?, ?)",
        )
        .bind(context_id)
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query("DELETE FROM chat_contexts WHERE id = ?")
            .bind(context_id)
            .execute(&pool)
            .await
            .unwrap();

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_items")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_rating_constraint_rejects_out_of_range_values() {
        let (pool, _temp_dir) = create_test_database().await;
        let now = "2024-06-01T00:00:00.000000Z";

        sqlx::query(
            "INSERT INTO users (public_id, created_at, updated_at) VALUES ('u1', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO chat_contexts (public_id, user_id, name, created_at, updated_at) VALUES ('c1', 1, 'n', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        let result = sqlx::query(
            "INSERT INTO chat_items (public_id, context_id, role, segments, rating, created_at, updated_at) VALUES ('i1', 1, 'user', '[]', 5, ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await;

        assert!(result.is_err());
    }
}
