use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Highest applied migration version and how many migrations have run.
pub async fn applied_summary(pool: &DbPool) -> Result<(i64, i64), MigrateError> {
    let summary: (i64, i64) =
        sqlx::query_as("SELECT IFNULL(MAX(version), 0), COUNT(*) FROM _sqlx_migrations")
            .fetch_one(pool)
            .await?;
    Ok(summary)
}
