use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the cache database file and its tables.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per job; status and image columns are written independently.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            id TEXT PRIMARY KEY,
            has_pms INTEGER,
            source TEXT,
            updated_at INTEGER,
            images_json TEXT,
            images_updated_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
