//! Job status service.
//!
//! The facade consumed by the HTTP API and the CLI. It owns one session's
//! [`StatusStore`], runs the classifier, applies the resolution policy
//! ([`jobsight_core::resolution`]), writes through to the durable cache
//! and pushes to the remote store.
//!
//! # Operations
//!
//! | Method | Effect |
//! |--------|--------|
//! | [`get_status`](StatusService::get_status) | Cache lookup with remote read-through |
//! | [`refresh_status`](StatusService::refresh_status) | Re-read remote, adopt if fresher |
//! | [`set_status`](StatusService::set_status) | Override, or a passive detected write |
//! | [`scan`](StatusService::scan) | Passive detection over job text |
//! | [`auto_detect`](StatusService::auto_detect) | Explicit detection ("Auto"), replaces overrides |
//! | [`get_images`](StatusService::get_images) / [`set_images`](StatusService::set_images) | Attachments |
//! | [`clear_local_cache`](StatusService::clear_local_cache) | Empty the local cache only |
//!
//! Calls for the same job are serialized; different jobs run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

use jobsight_core::cache::{PutOutcome, StatusStore};
use jobsight_core::classifier::{Classifier, Detection, JobText};
use jobsight_core::models::{
    Classification, EntityId, JobImage, RemotePatch, RemoteRecord, StatusRecord, StatusSource,
    WriteOrigin,
};
use jobsight_core::remote::RemoteStore;
use jobsight_core::resolution::{self, Action, Event, ResolutionState, Trigger};

use crate::cache_db::CacheDb;
use crate::config::Config;
use crate::supabase::SupabaseRemote;
use crate::sync::{PendingPush, PushOutcome, SyncClient};

/// What the presentation layer shows for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub job_id: EntityId,
    pub classification: Classification,
    /// `null` while the job is unknown.
    pub has_pms: Option<bool>,
    pub source: Option<StatusSource>,
    pub updated_at: Option<DateTime<Utc>>,
    /// No local or remote data: the caller should trigger detection.
    pub needs_detection: bool,
}

impl StatusView {
    fn new(job_id: &EntityId, record: Option<&StatusRecord>) -> Self {
        let state = ResolutionState::of(record);
        let classification = state.classification();
        Self {
            job_id: job_id.clone(),
            classification,
            has_pms: classification.as_flag(),
            source: record.map(|r| r.source),
            updated_at: record.map(|r| r.updated_at),
            needs_detection: record.is_none(),
        }
    }
}

/// Result of a local write and its remote push.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
    /// The write was accepted locally (or deliberately suppressed).
    pub success: bool,
    pub synced_remotely: bool,
    /// A passive detection was ignored because a user override exists.
    pub suppressed: bool,
    pub push: PushOutcome,
    pub status: StatusView,
    /// Human-readable note for the write ("User override: Has PMS", ...).
    pub note: Option<String>,
}

/// Result of running the classifier for a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionOutcome {
    pub detection: Detection,
    pub comment: String,
    pub update: UpdateOutcome,
}

/// A write whose remote push is still running.
pub struct DetachedUpdate {
    pub status: StatusView,
    pub suppressed: bool,
    pub pending: Option<PendingPush>,
}

/// Per-job mutexes. An entry lives only while someone holds or waits on it.
#[derive(Default)]
struct EntityLocks {
    inner: Mutex<HashMap<EntityId, Arc<tokio::sync::Mutex<()>>>>,
}

impl EntityLocks {
    async fn lock(&self, id: &EntityId) -> EntityGuard<'_> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(id.clone()).or_default().clone()
        };
        EntityGuard {
            locks: self,
            id: id.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct EntityGuard<'a> {
    locks: &'a EntityLocks,
    id: EntityId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EntityGuard<'_> {
    fn drop(&mut self) {
        // Waiters clone the Arc under the map lock, so a count of one here
        // means nobody else can still reach this mutex.
        let mut map = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        if map.get(&self.id).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(&self.id);
        }
    }
}

/// One session's job status pipeline.
pub struct StatusService {
    store: Arc<StatusStore>,
    sync: SyncClient,
    classifier: Arc<Classifier>,
    cache_db: Option<CacheDb>,
    locks: EntityLocks,
}

/// Validate a raw job id (or job page URL).
pub fn parse_job_id(raw: &str) -> Result<EntityId> {
    EntityId::parse_id_or_url(raw).map_err(anyhow::Error::new)
}

impl StatusService {
    pub fn new(store: Arc<StatusStore>, sync: SyncClient, classifier: Arc<Classifier>) -> Self {
        Self {
            store,
            sync,
            classifier,
            cache_db: None,
            locks: EntityLocks::default(),
        }
    }

    /// Write every local change through to `db` as well.
    pub fn with_cache_db(mut self, db: CacheDb) -> Self {
        self.cache_db = Some(db);
        self
    }

    /// Build a session from configuration: durable cache (hydrated into
    /// memory), classifier patterns, and the Supabase remote if configured.
    pub async fn open(config: &Config) -> Result<Self> {
        let classifier = Arc::new(config.classifier.build()?);
        let store = Arc::new(StatusStore::new());

        let sync = match &config.remote {
            Some(remote_cfg) => {
                let remote: Arc<dyn RemoteStore> = Arc::new(SupabaseRemote::new(remote_cfg)?);
                SyncClient::new(remote)
            }
            None => {
                tracing::info!("no [remote] configured; running with local cache only");
                SyncClient::disabled()
            }
        };

        let mut service = Self::new(store, sync, classifier);
        if config.cache.persist {
            let db = CacheDb::open(config).await?;
            let loaded = service.store.hydrate(db.load_all().await?);
            tracing::debug!(entries = loaded, path = %config.cache.path.display(), "local cache loaded");
            service = service.with_cache_db(db);
        }
        Ok(service)
    }

    pub async fn close(&self) {
        if let Some(db) = &self.cache_db {
            db.close().await;
        }
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Current status, reading through to the remote store on a cache miss.
    ///
    /// Entries loaded from the durable cache are checked against the remote
    /// once per session before they are trusted. A miss on both sides is
    /// reported as `Unknown` with `needs_detection`, never defaulted to
    /// `Absent`.
    pub async fn get_status(&self, raw_id: &str) -> Result<StatusView> {
        let id = parse_job_id(raw_id)?;
        let _guard = self.locks.lock(&id).await;

        if let Some(record) = self.store.get(&id) {
            if !self.store.needs_remote_check(&id) {
                tracing::debug!(job = %id, "cache hit");
                return Ok(StatusView::new(&id, Some(&record)));
            }
        }

        self.read_through(&id).await?;
        Ok(self.view(&id))
    }

    /// Re-read the remote record and adopt it if it is fresher than a
    /// local record not written in this session.
    pub async fn refresh_status(&self, raw_id: &str) -> Result<StatusView> {
        let id = parse_job_id(raw_id)?;
        let _guard = self.locks.lock(&id).await;

        if let Some(row) = self.sync.fetch_remote(&id).await {
            self.adopt_row(&id, row).await?;
        }
        Ok(self.view(&id))
    }

    /// Record a status from the presentation layer and wait for the push.
    ///
    /// `is_override = true` is a manual "Has PMS" / "No PMS" and always
    /// wins. `is_override = false` is a passive detection result and is
    /// suppressed when the job carries a user override; use
    /// [`auto_detect`](Self::auto_detect) to replace an override.
    pub async fn set_status(
        &self,
        raw_id: &str,
        has_pms: bool,
        is_override: bool,
    ) -> Result<UpdateOutcome> {
        let id = parse_job_id(raw_id)?;
        let _guard = self.locks.lock(&id).await;
        let detached = self.apply(&id, set_status_event(has_pms, is_override)).await?;
        let mut outcome = finish(detached).await;
        if is_override && !outcome.suppressed {
            outcome.note = Some(override_note(has_pms));
        }
        Ok(outcome)
    }

    /// Like [`set_status`](Self::set_status) but returns as soon as the
    /// local write is done; the push keeps running.
    pub async fn set_status_detached(
        &self,
        raw_id: &str,
        has_pms: bool,
        is_override: bool,
    ) -> Result<DetachedUpdate> {
        let id = parse_job_id(raw_id)?;
        let _guard = self.locks.lock(&id).await;
        self.apply(&id, set_status_event(has_pms, is_override)).await
    }

    /// Passive detection: classify the job's text unless a user override
    /// is in place, which is kept.
    pub async fn scan(&self, raw_id: &str, job: &JobText) -> Result<DetectionOutcome> {
        self.detect(raw_id, job, Trigger::Passive).await
    }

    /// Explicit detection ("Auto"): classify and replace any override.
    pub async fn auto_detect(&self, raw_id: &str, job: &JobText) -> Result<DetectionOutcome> {
        self.detect(raw_id, job, Trigger::Explicit).await
    }

    async fn detect(&self, raw_id: &str, job: &JobText, trigger: Trigger) -> Result<DetectionOutcome> {
        let id = parse_job_id(raw_id)?;
        let _guard = self.locks.lock(&id).await;

        if self.store.get(&id).is_none() || self.store.needs_remote_check(&id) {
            self.read_through(&id).await?;
        }

        let state = self.state(&id);
        let event = match trigger {
            Trigger::Passive => Event::LookupMiss,
            Trigger::Explicit => Event::Auto,
        };
        let next = resolution::step(state, event).next;

        let detection = self.classifier.detect(job);
        tracing::info!(
            job = %id,
            classification = %detection.classification,
            units = detection.units_examined,
            "classified job text"
        );

        let detached = self
            .apply_from(
                &id,
                next,
                Event::Classified {
                    has_pms: detection.has_pms(),
                    trigger,
                },
            )
            .await?;
        let comment = detection.comment();
        let mut update = finish(detached).await;
        if !update.suppressed {
            update.note = Some(comment.clone());
        }
        Ok(DetectionOutcome {
            detection,
            comment,
            update,
        })
    }

    /// Image attachments, reading through to the remote store when the
    /// cache has none.
    pub async fn get_images(&self, raw_id: &str) -> Result<Option<Vec<JobImage>>> {
        let id = parse_job_id(raw_id)?;
        let _guard = self.locks.lock(&id).await;

        if !self.store.needs_remote_check(&id) {
            if let Some(images) = self.store.images(&id) {
                return Ok(Some(images));
            }
        }
        self.read_through(&id).await?;
        Ok(self.store.images(&id))
    }

    /// Replace a job's attachments without touching its status.
    pub async fn set_images(&self, raw_id: &str, images: Vec<JobImage>) -> Result<UpdateOutcome> {
        let id = parse_job_id(raw_id)?;
        let _guard = self.locks.lock(&id).await;

        let at = self.store.put_images(&id, images.clone());
        if let Some(db) = &self.cache_db {
            log_cache_write(&id, db.save_images(&id, &images, at).await);
        }
        tracing::info!(job = %id, count = images.len(), "images saved locally");

        let pending = self.sync.spawn_push(RemotePatch::images(&id, images, at));
        Ok(finish(DetachedUpdate {
            status: self.view(&id),
            suppressed: false,
            pending: Some(pending),
        })
        .await)
    }

    /// Empty the local cache (memory and disk). The remote store is untouched.
    pub async fn clear_local_cache(&self) -> Result<usize> {
        let removed = self.store.clear();
        if let Some(db) = &self.cache_db {
            db.clear().await?;
        }
        tracing::info!(removed, "local cache cleared");
        Ok(removed)
    }

    fn state(&self, id: &EntityId) -> ResolutionState {
        ResolutionState::of(self.store.get(id).as_ref())
    }

    fn view(&self, id: &EntityId) -> StatusView {
        StatusView::new(id, self.store.get(id).as_ref())
    }

    async fn apply(&self, id: &EntityId, event: Event) -> Result<DetachedUpdate> {
        self.apply_from(id, self.state(id), event).await
    }

    /// Run one policy step from `state` and perform its action.
    async fn apply_from(
        &self,
        id: &EntityId,
        state: ResolutionState,
        event: Event,
    ) -> Result<DetachedUpdate> {
        let transition = resolution::step(state, event);
        match transition.action {
            Action::Persist { has_pms, origin } => self.persist(id, has_pms, origin).await,
            Action::Suppress => {
                tracing::info!(job = %id, "passive detection ignored; user override kept");
                Ok(DetachedUpdate {
                    status: self.view(id),
                    suppressed: true,
                    pending: None,
                })
            }
            Action::Adopt(record) => {
                self.adopt_status(record).await?;
                Ok(DetachedUpdate {
                    status: self.view(id),
                    suppressed: false,
                    pending: None,
                })
            }
            Action::None | Action::RunClassifier => Ok(DetachedUpdate {
                status: self.view(id),
                suppressed: false,
                pending: None,
            }),
        }
    }

    async fn persist(&self, id: &EntityId, has_pms: bool, origin: WriteOrigin) -> Result<DetachedUpdate> {
        let record = match self.store.put(id, has_pms, origin) {
            PutOutcome::Written(record) => record,
            PutOutcome::Suppressed(_) => {
                return Ok(DetachedUpdate {
                    status: self.view(id),
                    suppressed: true,
                    pending: None,
                })
            }
        };
        if let Some(db) = &self.cache_db {
            log_cache_write(id, db.save_status(&record).await);
        }
        tracing::info!(
            job = %id,
            has_pms = record.has_pms,
            source = record.source.as_str(),
            "status saved locally"
        );

        let pending = self.sync.spawn_push(RemotePatch::status(&record));
        Ok(DetachedUpdate {
            status: StatusView::new(id, Some(&record)),
            suppressed: false,
            pending: Some(pending),
        })
    }

    /// Fetch the remote row, fold it in, and mark the entry checked. An
    /// unreachable remote also counts as checked; `refresh_status` retries.
    async fn read_through(&self, id: &EntityId) -> Result<()> {
        if let Some(row) = self.sync.fetch_remote(id).await {
            self.adopt_row(id, row).await?;
        }
        self.store.mark_remote_checked(id);
        Ok(())
    }

    /// Fold a remote row into the local cache: status if it should be
    /// adopted, images if the cache has none or older ones. Each group is
    /// judged by its own remote timestamp.
    async fn adopt_row(&self, id: &EntityId, row: RemoteRecord) -> Result<()> {
        if let Some(remote_status) = row.status() {
            let local = self.store.get(id);
            let session = self.store.is_session_write(id);
            if resolution::should_adopt_remote(local.as_ref(), session, &remote_status) {
                let state = ResolutionState::of(local.as_ref());
                if let Action::Adopt(record) =
                    resolution::step(state, Event::Remote(remote_status)).action
                {
                    self.adopt_status(record).await?;
                }
            }
        }

        let remote_at = row.images_at();
        if let Some(images) = row.images {
            let local_at = self.store.entry(id).and_then(|e| e.images_updated_at);
            if local_at.map_or(true, |at| remote_at > at) {
                if let Some(db) = &self.cache_db {
                    db.save_images(id, &images, remote_at).await?;
                }
                self.store.set_images_at(id, images, remote_at);
            }
        }
        Ok(())
    }

    async fn adopt_status(&self, record: StatusRecord) -> Result<()> {
        tracing::info!(
            job = %record.entity_id,
            has_pms = record.has_pms,
            source = record.source.as_str(),
            "adopted remote status"
        );
        if let Some(db) = &self.cache_db {
            db.save_status(&record).await?;
        }
        self.store.adopt(record);
        Ok(())
    }
}

/// A failed disk write leaves the in-memory value in place for the session.
fn log_cache_write(id: &EntityId, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!(job = %id, error = %e, "local cache write failed; kept in memory only");
    }
}

fn override_note(has_pms: bool) -> String {
    if has_pms {
        "User override: Has PMS".to_string()
    } else {
        "User override: No PMS".to_string()
    }
}

fn set_status_event(has_pms: bool, is_override: bool) -> Event {
    if is_override {
        Event::Mark(has_pms)
    } else {
        Event::Classified {
            has_pms,
            trigger: Trigger::Passive,
        }
    }
}

async fn finish(update: DetachedUpdate) -> UpdateOutcome {
    let push = match update.pending {
        Some(pending) => pending.outcome().await,
        None => PushOutcome::Skipped,
    };
    UpdateOutcome {
        success: true,
        synced_remotely: push.is_synced(),
        suppressed: update.suppressed,
        push,
        status: update.status,
        note: None,
    }
}
