//! Supabase (PostgREST) remote store.
//!
//! Implements [`RemoteStore`] over the PostgREST REST interface that
//! Supabase exposes for every table.
//!
//! # Wire contract
//!
//! | Operation | Request |
//! |-----------|---------|
//! | fetch  | `GET {url}/rest/v1/{table}?id=eq.{id}&select=*` |
//! | upsert | `POST {url}/rest/v1/{table}` with `Prefer: resolution=merge-duplicates,return=minimal` |
//!
//! Both carry `apikey: <key>` and `Authorization: Bearer <key>`. The
//! upsert body is a one-element JSON array holding a partial row; fields
//! that are not being changed are omitted, so PostgREST's merge-duplicates
//! resolution updates only the supplied columns.
//!
//! # Expected table
//!
//! ```sql
//! create table jobs (
//!   id text primary key,
//!   has_pms boolean,
//!   source text,
//!   status_updated_at timestamptz,
//!   images jsonb,
//!   images_updated_at timestamptz,
//!   updated_at timestamptz not null
//! );
//! ```
//!
//! Status and images are separate write groups with their own timestamps.
//! Last-write-wins is enforced per group on the database side: a
//! `BEFORE UPDATE` trigger keeps the stored `has_pms`/`source` when the
//! incoming `status_updated_at` is older, keeps the stored `images` when
//! the incoming `images_updated_at` is older, and sets `updated_at` to the
//! greater of the two. A single row-level comparison would let an image
//! write shadow an older but still unseen status write. The in-memory
//! store's `merge_patch` implements the same rule.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use jobsight_core::models::{EntityId, RemotePatch, RemoteRecord};
use jobsight_core::remote::RemoteStore;

use crate::config::RemoteConfig;

/// PostgREST client for the jobs table.
pub struct SupabaseRemote {
    client: reqwest::Client,
    base_url: String,
    table: String,
    api_key: String,
}

impl SupabaseRemote {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            table: config.table.clone(),
            api_key,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }
}

#[async_trait]
impl RemoteStore for SupabaseRemote {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn fetch(&self, id: &EntityId) -> Result<Option<RemoteRecord>> {
        let filter = format!("eq.{}", id);
        let response = self
            .authed(self.client.get(self.table_url()))
            .query(&[("id", filter.as_str()), ("select", "*")])
            .send()
            .await
            .with_context(|| format!("Failed to reach Supabase while fetching job {}", id))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Supabase fetch for job {} failed with {}: {}", id, status, body);
        }

        let mut rows: Vec<RemoteRecord> = response
            .json()
            .await
            .with_context(|| format!("Invalid Supabase response for job {}", id))?;

        if rows.len() > 1 {
            tracing::warn!(job = %id, rows = rows.len(), "Supabase returned more than one row");
        }
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    async fn upsert(&self, patch: &RemotePatch) -> Result<()> {
        let response = self
            .authed(self.client.post(self.table_url()))
            .header("Content-Type", "application/json")
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[patch])
            .send()
            .await
            .with_context(|| format!("Failed to reach Supabase while saving job {}", patch.id))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "Supabase upsert for job {} failed with {}: {}",
                patch.id,
                status,
                body
            );
        }

        Ok(())
    }
}
