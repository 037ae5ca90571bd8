//! In-memory [`RemoteStore`] implementation for testing and WASM targets.
//!
//! Mirrors the merge semantics of the production store: rows are keyed by
//! job id and the status and image groups are merged independently, each
//! by its own timestamp. A patch older than a group only fills that group
//! when the row does not have it yet. The store can be switched offline to
//! exercise transport-failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{EntityId, RemotePatch, RemoteRecord};

use super::RemoteStore;

/// Shared in-memory remote store.
pub struct InMemoryRemote {
    rows: RwLock<HashMap<EntityId, RemoteRecord>>,
    online: AtomicBool,
    upserts: AtomicUsize,
    fetches: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
            upserts: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of upserts that reached the store.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Number of fetches that reached the store.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Direct read, bypassing the online switch and counters.
    pub fn row(&self, id: &EntityId) -> Option<RemoteRecord> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Seed a row directly, replacing any existing one.
    pub fn insert_row(&self, record: RemoteRecord) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record);
    }

    fn check_online(&self) -> Result<()> {
        if !self.online.load(Ordering::SeqCst) {
            bail!("in-memory remote is offline");
        }
        Ok(())
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge `patch` into `row`, last-write-wins per field group.
pub fn merge_patch(row: &mut RemoteRecord, patch: &RemotePatch) {
    if patch.has_status() {
        let missing = row.has_pms.is_none() && row.source.is_none();
        if missing || patch.status_at() >= row.status_at() {
            if patch.has_pms.is_some() {
                row.has_pms = patch.has_pms;
            }
            if patch.source.is_some() {
                row.source = patch.source;
            }
            row.status_updated_at = Some(patch.status_at());
        }
    }

    if let Some(images) = &patch.images {
        if row.images.is_none() || patch.images_at() >= row.images_at() {
            row.images = Some(images.clone());
            row.images_updated_at = Some(patch.images_at());
        }
    }

    row.updated_at = row.updated_at.max(patch.updated_at);
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, id: &EntityId) -> Result<Option<RemoteRecord>> {
        self.check_online()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.row(id))
    }

    async fn upsert(&self, patch: &RemotePatch) -> Result<()> {
        self.check_online()?;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        match rows.get_mut(&patch.id) {
            Some(row) => merge_patch(row, patch),
            None => {
                rows.insert(patch.id.clone(), RemoteRecord::from_patch(patch));
            }
        }
        Ok(())
    }
}
