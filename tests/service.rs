//! End-to-end tests of the status pipeline against an in-memory remote.
//!
//! Each test builds a fresh session (`StatusService`) over a shared
//! `InMemoryRemote`, so cross-session behaviour is tested by opening a
//! second service against the same remote.

use std::sync::Arc;

use chrono::{Duration, Utc};
use jobsight::cache::StatusStore;
use jobsight::cache_db::CacheDb;
use jobsight::config::Config;
use jobsight::classifier::{Classifier, JobText};
use jobsight::models::{
    CacheEntry, Classification, EntityId, EntityIdError, JobImage, RemoteRecord, StatusRecord,
    StatusSource,
};
use jobsight::remote::memory::InMemoryRemote;
use jobsight::service::StatusService;
use jobsight::sync::{PushOutcome, SyncClient};
use tempfile::TempDir;

// ─── Helpers ────────────────────────────────────────────────────────

fn session(remote: &Arc<InMemoryRemote>) -> StatusService {
    StatusService::new(
        Arc::new(StatusStore::new()),
        SyncClient::new(remote.clone()),
        Arc::new(Classifier::default()),
    )
}

fn id(s: &str) -> EntityId {
    EntityId::new(s).unwrap()
}

fn pms_job() -> JobText {
    JobText::from_lines(["Tee 1 | PMS 185 C | front"])
}

fn plain_job() -> JobText {
    JobText::from_lines(["Tee 1 | 4-color process", "Hoodie | black ink"])
}

fn image(url: &str) -> JobImage {
    JobImage {
        url: url.to_string(),
        caption: "front".to_string(),
        asset_tag: "A1".to_string(),
    }
}

// ─── Overrides ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_override_survives_passive_scan() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);

    let outcome = svc.set_status("42", false, true).await.unwrap();
    assert!(outcome.success);
    assert!(outcome.synced_remotely);
    assert_eq!(outcome.status.classification, Classification::Absent);
    assert_eq!(outcome.status.source, Some(StatusSource::UserOverride));
    assert_eq!(outcome.note.as_deref(), Some("User override: No PMS"));

    let scan = svc.scan("42", &pms_job()).await.unwrap();
    assert_eq!(scan.detection.classification, Classification::Present);
    assert!(scan.update.suppressed);
    assert!(scan.update.success);
    assert!(!scan.update.synced_remotely);

    let view = svc.get_status("42").await.unwrap();
    assert_eq!(view.classification, Classification::Absent);
    assert_eq!(view.has_pms, Some(false));
    assert_eq!(view.source, Some(StatusSource::UserOverride));

    let row = remote.row(&id("42")).unwrap();
    assert_eq!(row.has_pms, Some(false));
    assert_eq!(row.source, Some(StatusSource::UserOverride));
}

#[tokio::test]
async fn test_auto_detect_replaces_override() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);

    svc.set_status("42", false, true).await.unwrap();
    let auto = svc.auto_detect("42", &pms_job()).await.unwrap();

    assert!(!auto.update.suppressed);
    assert!(auto.update.synced_remotely);
    assert_eq!(auto.update.status.classification, Classification::Present);
    assert_eq!(auto.update.status.source, Some(StatusSource::Detected));
    assert!(auto.comment.starts_with("PMS color found in job line 0"));

    let row = remote.row(&id("42")).unwrap();
    assert_eq!(row.has_pms, Some(true));
    assert_eq!(row.source, Some(StatusSource::Detected));
}

#[tokio::test]
async fn test_passive_set_status_does_not_replace_override() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);

    svc.set_status("9", true, true).await.unwrap();
    let outcome = svc.set_status("9", false, false).await.unwrap();

    assert!(outcome.suppressed);
    assert_eq!(outcome.push, PushOutcome::Skipped);
    assert_eq!(remote.upsert_count(), 1);
    assert_eq!(outcome.status.has_pms, Some(true));
}

#[tokio::test]
async fn test_override_replaces_override() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);

    svc.set_status("9", true, true).await.unwrap();
    let outcome = svc.set_status("9", false, true).await.unwrap();
    assert!(!outcome.suppressed);
    assert_eq!(outcome.status.classification, Classification::Absent);
}

// ─── Detection ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_scan_without_data_records_detection() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);

    let scan = svc.scan("100", &plain_job()).await.unwrap();
    assert_eq!(scan.detection.classification, Classification::Absent);
    assert_eq!(scan.comment, "No PMS color found in 2 unit(s)");
    assert_eq!(scan.update.status.source, Some(StatusSource::Detected));
    assert!(scan.update.synced_remotely);

    // A later passive scan with new text updates a detected status.
    let rescan = svc.scan("100", &pms_job()).await.unwrap();
    assert!(!rescan.update.suppressed);
    assert_eq!(rescan.update.status.classification, Classification::Present);
}

#[tokio::test]
async fn test_comment_unit_detected() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);

    let job = JobText::from_lines(["Tee | black"]).with_comment("customer wants pantone 286");
    let scan = svc.scan("5", &job).await.unwrap();
    assert_eq!(scan.detection.classification, Classification::Present);
    assert_eq!(scan.comment, "PMS color found in order comment");
}

// ─── Read-through ───────────────────────────────────────────────────

#[tokio::test]
async fn test_cache_miss_reads_through_to_remote() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.insert_row(RemoteRecord {
        id: id("77"),
        has_pms: Some(true),
        source: Some(StatusSource::UserOverride),
        status_updated_at: None,
        images: None,
        images_updated_at: None,
        updated_at: Utc::now(),
    });
    let svc = session(&remote);

    let view = svc.get_status("77").await.unwrap();
    assert_eq!(view.classification, Classification::Present);
    assert_eq!(view.source, Some(StatusSource::UserOverride));
    assert!(!view.needs_detection);
    assert_eq!(remote.fetch_count(), 1);

    // Second read is served from the cache.
    svc.get_status("77").await.unwrap();
    assert_eq!(remote.fetch_count(), 1);
}

#[tokio::test]
async fn test_miss_everywhere_is_unknown() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);

    let view = svc.get_status("404").await.unwrap();
    assert_eq!(view.classification, Classification::Unknown);
    assert_eq!(view.has_pms, None);
    assert!(view.needs_detection);
    assert!(svc.store().is_empty());
}

#[tokio::test]
async fn test_remote_failure_reads_as_unknown() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.insert_row(RemoteRecord {
        id: id("8"),
        has_pms: Some(true),
        source: None,
        status_updated_at: None,
        images: None,
        images_updated_at: None,
        updated_at: Utc::now(),
    });
    remote.set_online(false);
    let svc = session(&remote);

    let view = svc.get_status("8").await.unwrap();
    assert_eq!(view.classification, Classification::Unknown);
}

#[tokio::test]
async fn test_other_session_sees_write() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = session(&remote);
    let b = session(&remote);

    a.set_status("31", true, true).await.unwrap();
    let view = b.get_status("31").await.unwrap();
    assert_eq!(view.classification, Classification::Present);
    assert_eq!(view.source, Some(StatusSource::UserOverride));
}

#[tokio::test]
async fn test_loaded_entry_checks_remote_once() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);
    svc.store().hydrate(vec![(
        id("15"),
        CacheEntry {
            status: Some(StatusRecord {
                entity_id: id("15"),
                has_pms: true,
                source: StatusSource::Detected,
                updated_at: Utc::now() - Duration::hours(1),
            }),
            ..Default::default()
        },
    )]);
    remote.insert_row(RemoteRecord {
        id: id("15"),
        has_pms: Some(false),
        source: Some(StatusSource::UserOverride),
        status_updated_at: None,
        images: None,
        images_updated_at: None,
        updated_at: Utc::now(),
    });

    let view = svc.get_status("15").await.unwrap();
    assert_eq!(view.classification, Classification::Absent);
    assert_eq!(view.source, Some(StatusSource::UserOverride));
    assert_eq!(remote.fetch_count(), 1);

    svc.get_status("15").await.unwrap();
    assert_eq!(remote.fetch_count(), 1);
}

#[tokio::test]
async fn test_loaded_entry_kept_when_remote_is_older() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);
    remote.insert_row(RemoteRecord {
        id: id("16"),
        has_pms: Some(false),
        source: Some(StatusSource::Detected),
        status_updated_at: None,
        images: None,
        images_updated_at: None,
        updated_at: Utc::now() - Duration::hours(2),
    });
    svc.store().hydrate(vec![(
        id("16"),
        CacheEntry {
            status: Some(StatusRecord {
                entity_id: id("16"),
                has_pms: true,
                source: StatusSource::UserOverride,
                updated_at: Utc::now(),
            }),
            ..Default::default()
        },
    )]);

    let view = svc.get_status("16").await.unwrap();
    assert_eq!(view.classification, Classification::Present);
    assert_eq!(view.source, Some(StatusSource::UserOverride));
    assert_eq!(remote.fetch_count(), 1);
}

// ─── Refresh ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_adopts_fresher_remote() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);
    let old = Utc::now() - Duration::hours(1);
    svc.store().adopt(StatusRecord {
        entity_id: id("12"),
        has_pms: false,
        source: StatusSource::Detected,
        updated_at: old,
    });
    remote.insert_row(RemoteRecord {
        id: id("12"),
        has_pms: Some(true),
        source: Some(StatusSource::UserOverride),
        status_updated_at: None,
        images: None,
        images_updated_at: None,
        updated_at: Utc::now(),
    });

    let cached = svc.get_status("12").await.unwrap();
    assert_eq!(cached.classification, Classification::Absent);

    let refreshed = svc.refresh_status("12").await.unwrap();
    assert_eq!(refreshed.classification, Classification::Present);
    assert_eq!(refreshed.source, Some(StatusSource::UserOverride));
}

#[tokio::test]
async fn test_refresh_keeps_session_write() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);
    svc.set_status("12", false, true).await.unwrap();

    remote.insert_row(RemoteRecord {
        id: id("12"),
        has_pms: Some(true),
        source: Some(StatusSource::Detected),
        status_updated_at: None,
        images: None,
        images_updated_at: None,
        updated_at: Utc::now() + Duration::minutes(5),
    });

    let view = svc.refresh_status("12").await.unwrap();
    assert_eq!(view.classification, Classification::Absent);
    assert_eq!(view.source, Some(StatusSource::UserOverride));
}

// ─── Offline and detached writes ────────────────────────────────────

#[tokio::test]
async fn test_offline_write_is_kept_locally() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.set_online(false);
    let svc = session(&remote);

    let outcome = svc.set_status("7", true, true).await.unwrap();
    assert!(outcome.success);
    assert!(!outcome.synced_remotely);
    assert!(matches!(outcome.push, PushOutcome::Failed(_)));

    let view = svc.get_status("7").await.unwrap();
    assert_eq!(view.classification, Classification::Present);
    assert!(remote.row(&id("7")).is_none());
}

#[tokio::test]
async fn test_detached_push_completes() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);

    let detached = svc.set_status_detached("3", true, true).await.unwrap();
    assert_eq!(detached.status.classification, Classification::Present);
    let pending = detached.pending.expect("push should be started");
    assert_eq!(pending.outcome().await, PushOutcome::Synced);
    assert_eq!(remote.row(&id("3")).unwrap().has_pms, Some(true));
}

#[tokio::test]
async fn test_local_only_session_reports_unsynced() {
    let svc = StatusService::new(
        Arc::new(StatusStore::new()),
        SyncClient::disabled(),
        Arc::new(Classifier::default()),
    );
    let outcome = svc.set_status("1", true, true).await.unwrap();
    assert!(outcome.success);
    assert!(!outcome.synced_remotely);
    assert_eq!(outcome.push, PushOutcome::Disabled);
}

// ─── Images ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_images_and_status_do_not_clobber() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);

    svc.set_status("50", true, true).await.unwrap();
    let outcome = svc
        .set_images("50", vec![image("https://img/50.png")])
        .await
        .unwrap();
    assert!(outcome.synced_remotely);
    svc.set_status("50", false, true).await.unwrap();

    let row = remote.row(&id("50")).unwrap();
    assert_eq!(row.has_pms, Some(false));
    assert_eq!(row.images.as_ref().map(Vec::len), Some(1));

    let other = session(&remote);
    let images = other.get_images("50").await.unwrap().unwrap();
    assert_eq!(images[0].url, "https://img/50.png");
    assert_eq!(
        other.get_status("50").await.unwrap().classification,
        Classification::Absent
    );
}

#[tokio::test]
async fn test_unsynced_images_survive_refresh() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = session(&remote);
    let b = session(&remote);

    a.set_images("70", vec![image("https://img/old.png")])
        .await
        .unwrap();
    remote.set_online(false);
    let offline = a
        .set_images("70", vec![image("https://img/new.png")])
        .await
        .unwrap();
    assert!(!offline.synced_remotely);
    remote.set_online(true);

    // Another session's status push makes the row newer than A's images.
    b.set_status("70", true, true).await.unwrap();

    a.refresh_status("70").await.unwrap();
    let images = a.get_images("70").await.unwrap().unwrap();
    assert_eq!(images[0].url, "https://img/new.png");
    assert_eq!(
        a.get_status("70").await.unwrap().source,
        Some(StatusSource::UserOverride)
    );
}

#[tokio::test]
async fn test_images_missing_everywhere() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);
    assert!(svc.get_images("61").await.unwrap().is_none());
}

// ─── Cache ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_clear_local_cache_keeps_remote() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);
    svc.set_status("20", true, true).await.unwrap();
    svc.set_status("21", false, true).await.unwrap();

    assert_eq!(svc.clear_local_cache().await.unwrap(), 2);
    assert!(svc.store().is_empty());
    assert!(remote.row(&id("20")).is_some());

    let view = svc.get_status("20").await.unwrap();
    assert_eq!(view.classification, Classification::Present);
}

#[tokio::test]
async fn test_disk_failure_keeps_write_and_pushes() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = Config::minimal();
    cfg.cache.persist = true;
    cfg.cache.path = tmp.path().join("cache.sqlite");
    let db = CacheDb::open(&cfg).await.unwrap();
    db.close().await;

    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote).with_cache_db(db);

    let outcome = svc.set_status("90", true, true).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.push, PushOutcome::Synced);
    assert_eq!(outcome.status.classification, Classification::Present);
    assert_eq!(remote.row(&id("90")).unwrap().has_pms, Some(true));

    let saved = svc.set_images("90", vec![image("https://img/90.png")]).await;
    assert!(saved.unwrap().synced_remotely);
}

// ─── Ids ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_id_is_typed_error() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);

    let err = svc.get_status("").await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<EntityIdError>(),
        Some(&EntityIdError::Empty)
    );
    let err = svc.set_status("a b", true, true).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EntityIdError>(),
        Some(EntityIdError::InvalidChar(' '))
    ));
    assert_eq!(remote.upsert_count(), 0);
}

#[tokio::test]
async fn test_job_url_resolves_to_id() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = session(&remote);

    svc.set_status("https://shop.example.com/Jobs/View?ID=4321", true, true)
        .await
        .unwrap();
    let view = svc.get_status("4321").await.unwrap();
    assert_eq!(view.job_id, id("4321"));
    assert_eq!(view.classification, Classification::Present);
}
