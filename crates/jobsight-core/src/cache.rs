//! Local status cache.
//!
//! [`StatusStore`] maps a job id to its last-known [`StatusRecord`] plus the
//! job's image attachments. It is an explicit, session-scoped instance:
//! callers receive it by injection and empty it with [`StatusStore::clear`].
//! All operations are synchronous and never touch the remote store.
//!
//! Uses `HashMap` behind `std::sync::RwLock`, so a `put` is visible to the
//! next `get` on any thread immediately.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::models::{CacheEntry, EntityId, JobImage, StatusRecord, StatusSource, WriteOrigin};

/// Result of [`StatusStore::put`].
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    /// The record now stored for the job.
    Written(StatusRecord),
    /// A passive detection hit an existing user override; the override is kept.
    Suppressed(StatusRecord),
}

impl PutOutcome {
    /// The record in effect after the call.
    pub fn record(&self) -> &StatusRecord {
        match self {
            Self::Written(r) | Self::Suppressed(r) => r,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written(_))
    }
}

/// In-memory job status cache.
#[derive(Debug, Default)]
pub struct StatusStore {
    entries: RwLock<HashMap<EntityId, CacheEntry>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EntityId, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EntityId, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up the status record for a job.
    pub fn get(&self, id: &EntityId) -> Option<StatusRecord> {
        self.read().get(id).and_then(|e| e.status.clone())
    }

    /// The full cache entry (status and images) for a job.
    pub fn entry(&self, id: &EntityId) -> Option<CacheEntry> {
        self.read().get(id).cloned()
    }

    /// Whether the job's status was written locally during this session.
    pub fn is_session_write(&self, id: &EntityId) -> bool {
        self.read().get(id).is_some_and(|e| e.session_write)
    }

    /// Whether a lookup should consult the remote store before trusting
    /// the cached status: true for entries loaded from durable storage that
    /// neither this session wrote nor has checked against the remote yet.
    pub fn needs_remote_check(&self, id: &EntityId) -> bool {
        self.read()
            .get(id)
            .is_some_and(|e| e.unverified && !e.session_write)
    }

    /// Record that the remote row for `id` was consulted this session.
    pub fn mark_remote_checked(&self, id: &EntityId) {
        if let Some(entry) = self.write().get_mut(id) {
            entry.unverified = false;
        }
    }

    /// Upsert the status for a job, stamped with the current time.
    ///
    /// A [`WriteOrigin::PassiveScan`] never replaces a
    /// [`StatusSource::UserOverride`] record; the existing override is
    /// returned as [`PutOutcome::Suppressed`]. Every other write replaces
    /// the prior record.
    pub fn put(&self, id: &EntityId, has_pms: bool, origin: WriteOrigin) -> PutOutcome {
        let mut entries = self.write();
        let entry = entries.entry(id.clone()).or_default();

        if origin == WriteOrigin::PassiveScan {
            if let Some(existing) = &entry.status {
                if existing.source == StatusSource::UserOverride {
                    return PutOutcome::Suppressed(existing.clone());
                }
            }
        }

        let record = StatusRecord {
            entity_id: id.clone(),
            has_pms,
            source: origin.source(),
            updated_at: Utc::now(),
        };
        entry.status = Some(record.clone());
        entry.session_write = true;
        PutOutcome::Written(record)
    }

    /// Store a record read from the remote store as-is.
    ///
    /// Keeps the remote timestamp and does not count as a session write.
    pub fn adopt(&self, record: StatusRecord) {
        let mut entries = self.write();
        let entry = entries.entry(record.entity_id.clone()).or_default();
        entry.status = Some(record);
        entry.session_write = false;
        entry.unverified = false;
    }

    /// Image attachments for a job.
    pub fn images(&self, id: &EntityId) -> Option<Vec<JobImage>> {
        self.read().get(id).and_then(|e| e.images.clone())
    }

    /// Replace the image attachments for a job, leaving its status alone.
    ///
    /// Returns the timestamp stamped on the attachment list.
    pub fn put_images(&self, id: &EntityId, images: Vec<JobImage>) -> DateTime<Utc> {
        let now = Utc::now();
        self.set_images_at(id, images, now);
        now
    }

    /// Replace the image attachments with an externally timestamped list.
    pub fn set_images_at(&self, id: &EntityId, images: Vec<JobImage>, at: DateTime<Utc>) {
        let mut entries = self.write();
        let entry = entries.entry(id.clone()).or_default();
        entry.images = Some(images);
        entry.images_updated_at = Some(at);
    }

    /// Load entries from durable storage, replacing same-key entries.
    pub fn hydrate<I>(&self, loaded: I) -> usize
    where
        I: IntoIterator<Item = (EntityId, CacheEntry)>,
    {
        let mut entries = self.write();
        let mut count = 0;
        for (id, mut entry) in loaded {
            entry.session_write = false;
            entry.unverified = true;
            entries.insert(id, entry);
            count += 1;
        }
        count
    }

    /// Snapshot of all entries, sorted by job id.
    pub fn entries(&self) -> Vec<(EntityId, CacheEntry)> {
        let mut all: Vec<_> = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.write();
        let n = entries.len();
        entries.clear();
        n
    }
}
