//! SQLite persistence for the local status cache.
//!
//! The in-memory [`StatusStore`](jobsight_core::cache::StatusStore) is the
//! fast path; this table makes it survive restarts. The store is hydrated
//! from [`CacheDb::load_all`] at session start and every local write is
//! written through here before the remote push is started.
//!
//! Status columns and image columns are upserted independently so that a
//! status write never clears images and vice versa.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use jobsight_core::models::{CacheEntry, EntityId, JobImage, StatusRecord, StatusSource};

use crate::config::Config;
use crate::{db, migrate};

/// SQLite-backed durable copy of the local cache.
#[derive(Clone)]
pub struct CacheDb {
    pool: SqlitePool,
}

impl CacheDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await.with_context(|| {
            format!("Failed to open cache database {}", config.cache.path.display())
        })?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Read every cached entry. Rows with unusable ids or sources are skipped.
    pub async fn load_all(&self) -> Result<Vec<(EntityId, CacheEntry)>> {
        let rows = sqlx::query(
            "SELECT id, has_pms, source, updated_at, images_json, images_updated_at \
             FROM cache_entries ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_id: String = row.get("id");
            let id = match EntityId::new(&raw_id) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(id = %raw_id, error = %e, "skipping cached row with invalid job id");
                    continue;
                }
            };

            let has_pms: Option<bool> = row.get("has_pms");
            let source: Option<String> = row.get("source");
            let updated_at: Option<i64> = row.get("updated_at");
            let status = match (has_pms, source.as_deref().and_then(StatusSource::parse), updated_at)
            {
                (Some(has_pms), Some(source), Some(ts)) => Some(StatusRecord {
                    entity_id: id.clone(),
                    has_pms,
                    source,
                    updated_at: from_micros(ts),
                }),
                _ => None,
            };

            let images_json: Option<String> = row.get("images_json");
            let images = match images_json {
                Some(json) => match serde_json::from_str::<Vec<JobImage>>(&json) {
                    Ok(images) => Some(images),
                    Err(e) => {
                        tracing::warn!(id = %id, error = %e, "dropping unreadable cached images");
                        None
                    }
                },
                None => None,
            };
            let images_updated_at: Option<i64> = row.get("images_updated_at");

            entries.push((
                id,
                CacheEntry {
                    status,
                    images,
                    images_updated_at: images_updated_at.map(from_micros),
                    session_write: false,
                    unverified: true,
                },
            ));
        }

        Ok(entries)
    }

    /// Upsert the status columns for one job.
    pub async fn save_status(&self, record: &StatusRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (id, has_pms, source, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                has_pms = excluded.has_pms,
                source = excluded.source,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.entity_id.as_str())
        .bind(record.has_pms)
        .bind(record.source.as_str())
        .bind(record.updated_at.timestamp_micros())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert the image columns for one job.
    pub async fn save_images(
        &self,
        id: &EntityId,
        images: &[JobImage],
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let json = serde_json::to_string(images)?;
        sqlx::query(
            r#"
            INSERT INTO cache_entries (id, images_json, images_updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                images_json = excluded.images_json,
                images_updated_at = excluded.images_updated_at
            "#,
        )
        .bind(id.as_str())
        .bind(json)
        .bind(updated_at.timestamp_micros())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete every cached row. Returns the number of rows removed.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn from_micros(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts).unwrap_or_default()
}
