//! Remote store abstraction.
//!
//! The [`RemoteStore`] trait is the seam between the sync layer and the
//! shared, authoritative store (Supabase in production, in-memory for
//! tests and WASM targets).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Contract
//!
//! | Method | Semantics |
//! |--------|-----------|
//! | [`fetch`](RemoteStore::fetch) | Zero-or-one record for an id |
//! | [`upsert`](RemoteStore::upsert) | Idempotent, field-level merge keyed by id; last write wins on `updated_at` |
//!
//! Conflicts between sessions are resolved entirely inside the store. A
//! client never holds a lock across calls.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{EntityId, RemotePatch, RemoteRecord};

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short name used in log lines (e.g. `"supabase"`).
    fn name(&self) -> &str;

    /// Read the record for a job. `Ok(None)` when the store has no row.
    async fn fetch(&self, id: &EntityId) -> Result<Option<RemoteRecord>>;

    /// Merge a partial record into the store.
    ///
    /// Only the fields present in `patch` are written; missing fields keep
    /// their stored values.
    async fn upsert(&self, patch: &RemotePatch) -> Result<()>;
}
