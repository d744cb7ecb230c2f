//! Embedded schema migrations

use sqlx::{migrate::Migrator, SqlitePool};
use tracing::info;

use crate::types::DatabaseResult;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Bring the schema up to the latest embedded migration. Already applied
/// migrations are skipped.
pub async fn run_migrations(pool: &SqlitePool) -> DatabaseResult<()> {
    MIGRATOR.run(pool).await?;
    info!(
        migrations = MIGRATOR.iter().count(),
        "schema is up to date"
    );
    Ok(())
}
