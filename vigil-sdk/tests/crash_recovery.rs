//! Startup reconciliation against a mock backend.

mod common;

use common::*;
use serde_json::Value;
use std::sync::Arc;
use tempfile::tempdir;
use vigil_sdk::prelude::*;

fn json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn crash_correlation_end_to_end() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir.path().join("storage"));
    let session = seed_open_session(&storage, 1_000);

    let reporter = Arc::new(MemoryCrashReporter::new());
    reporter.add(crash_for(&session, "crash-1", 1_040));

    let server = backend(200).await;
    let uploader = uploader(&server, &dir.path().join("uploads"), fast_redundancy(0));
    let report = UnsentDataReconciler::new(storage.clone(), uploader.clone())
        .with_crash_reporter(reporter.clone())
        .reconcile()
        .await
        .unwrap();

    assert_eq!(report.matched_crashes, vec!["crash-1".to_string()]);
    assert_eq!(report.staged, vec![session.id]);
    assert!(report.orphaned.is_empty());
    assert_eq!(report.dispatch.delivered, 2);

    assert!(storage.fetch_session(session.id).is_none());
    assert!(storage.fetch_spans_for_session(session.id).completed.is_empty());
    assert!(uploader.cache().is_empty());
    assert!(reporter.is_empty());

    let sessions = requests_to(&server, SESSIONS_PATH).await;
    let blobs = requests_to(&server, BLOBS_PATH).await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(blobs.len(), 1);

    let payload = json(&sessions[0].body);
    assert_eq!(payload["v"], 15);
    assert_eq!(payload["ty"], "en");
    assert_eq!(payload["tr"], true);
    assert_eq!(payload["ce"], false);
    assert_eq!(payload["cs"], true);
    assert_eq!(payload["s"]["crash_report_id"], "crash-1");
    assert_eq!(payload["s"]["et"], 1_040_000);
    assert_eq!(payload["s"]["sn"], 1);
    assert_eq!(payload["spans"].as_array().unwrap().len(), 1);
    assert_eq!(payload["span_snapshots"].as_array().unwrap().len(), 1);

    let blob = json(&blobs[0].body);
    assert_eq!(blob["id"], "crash-1");
    assert_eq!(blob["report"]["signal"], "SIGSEGV");
}

#[tokio::test]
async fn failed_upload_keeps_entries_in_cache() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir.path().join("storage"));
    let session = seed_open_session(&storage, 1_000);

    let reporter = Arc::new(MemoryCrashReporter::new());
    reporter.add(crash_for(&session, "crash-1", 1_040));

    let retries = 2;
    let server = backend(500).await;
    let uploader = uploader(&server, &dir.path().join("uploads"), fast_redundancy(retries));
    let report = UnsentDataReconciler::new(storage.clone(), uploader.clone())
        .with_crash_reporter(reporter.clone())
        .reconcile()
        .await
        .unwrap();

    assert_eq!(report.dispatch.failed, 2);
    assert_eq!(uploader.cache().len(), 2);
    assert!(storage.fetch_session(session.id).is_none());
    assert!(reporter.is_empty());

    let expected = 1 + retries as usize;
    assert_eq!(requests_to(&server, SESSIONS_PATH).await.len(), expected);
    assert_eq!(requests_to(&server, BLOBS_PATH).await.len(), expected);

    for entry in uploader.cache().fetch_all().unwrap() {
        assert_eq!(entry.attempt_count, 1);
    }
}

#[tokio::test]
async fn carried_over_entries_are_delivered_on_next_launch() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("uploads");
    let storage = open_storage(&dir.path().join("storage"));
    seed_ended_session(&storage, 1_000);

    let down = backend(503).await;
    let first = UnsentDataReconciler::new(storage.clone(), uploader(&down, &cache_dir, fast_redundancy(0)))
        .reconcile()
        .await
        .unwrap();
    assert_eq!(first.dispatch.failed, 1);

    let up = backend(200).await;
    let retry_uploader = uploader(&up, &cache_dir, fast_redundancy(0));
    let second = UnsentDataReconciler::new(storage.clone(), retry_uploader.clone())
        .reconcile()
        .await
        .unwrap();

    assert!(second.staged.is_empty());
    assert_eq!(second.dispatch.delivered, 1);
    assert_eq!(requests_to(&up, SESSIONS_PATH).await.len(), 1);
    assert!(retry_uploader.cache().is_empty());
}

#[tokio::test]
async fn finished_session_without_crash_reporter() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir.path().join("storage"));
    let session = seed_ended_session(&storage, 2_000);

    let server = backend(200).await;
    let uploader = uploader(&server, &dir.path().join("uploads"), fast_redundancy(0));
    let report = UnsentDataReconciler::new(storage.clone(), uploader)
        .reconcile()
        .await
        .unwrap();

    assert_eq!(report.staged, vec![session.id]);
    assert_eq!(requests_to(&server, SESSIONS_PATH).await.len(), 1);
    assert_eq!(requests_to(&server, BLOBS_PATH).await.len(), 0);

    let payload = json(&requests_to(&server, SESSIONS_PATH).await[0].body);
    assert_eq!(payload["ce"], true);
    assert_eq!(payload["tr"], false);
    assert!(payload["s"].get("crash_report_id").is_none());
}

#[tokio::test]
async fn crash_fetch_failure_leaves_everything_untouched() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir.path().join("storage"));
    let open = seed_open_session(&storage, 1_000);
    let ended = seed_ended_session(&storage, 2_000);

    let server = backend(200).await;
    let uploader = uploader(&server, &dir.path().join("uploads"), fast_redundancy(0));
    let err = UnsentDataReconciler::new(storage.clone(), uploader.clone())
        .with_crash_reporter(Arc::new(FailingCrashReporter))
        .reconcile()
        .await
        .unwrap_err();

    assert_eq!(err.code(), "E501");
    assert_eq!(storage.fetch_session(open.id), Some(open));
    assert_eq!(storage.fetch_session(ended.id), Some(ended));
    assert!(uploader.cache().is_empty());
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn open_session_of_dead_process_is_closed_at_last_heartbeat() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir.path().join("storage"));
    let session = seed_open_session(&storage, 1_000);

    let server = backend(200).await;
    let uploader = uploader(&server, &dir.path().join("uploads"), fast_redundancy(0));
    let report = UnsentDataReconciler::new(storage.clone(), uploader)
        .with_crash_reporter(Arc::new(MemoryCrashReporter::new()))
        .reconcile()
        .await
        .unwrap();

    assert_eq!(report.orphaned, vec![session.id]);
    assert_eq!(report.staged, vec![session.id]);
    assert!(storage.fetch_session(session.id).is_none());

    let payload = json(&requests_to(&server, SESSIONS_PATH).await[0].body);
    assert_eq!(payload["s"]["et"], 1_030_000);
    assert_eq!(payload["ce"], false);
    assert_eq!(payload["tr"], true);
    assert_eq!(requests_to(&server, BLOBS_PATH).await.len(), 0);
}

#[tokio::test]
async fn active_session_of_this_process_is_left_alone() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir.path().join("storage"));
    let live = SessionRecord::new(SessionId::new(), ProcessId::current(), at(5_000));
    storage.add_session(live.clone()).unwrap();

    let server = backend(200).await;
    let uploader = uploader(&server, &dir.path().join("uploads"), fast_redundancy(0));
    let report = UnsentDataReconciler::new(storage.clone(), uploader)
        .reconcile()
        .await
        .unwrap();

    assert!(report.staged.is_empty());
    assert!(report.orphaned.is_empty());
    assert_eq!(storage.fetch_session(live.id), Some(live));
    assert!(requests_to(&server, SESSIONS_PATH).await.is_empty());
}

#[tokio::test]
async fn crash_for_unknown_session_is_discarded() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir.path().join("storage"));

    let reporter = Arc::new(MemoryCrashReporter::new());
    reporter.add(CrashReport::new("ghost", Some(SessionId::new()), Some(at(10))));
    reporter.add(CrashReport::new("untagged", None, None));

    let server = backend(200).await;
    let uploader = uploader(&server, &dir.path().join("uploads"), fast_redundancy(0));
    let report = UnsentDataReconciler::new(storage.clone(), uploader)
        .with_crash_reporter(reporter.clone())
        .reconcile()
        .await
        .unwrap();

    assert_eq!(report.unmatched_crashes.len(), 2);
    assert!(report.matched_crashes.is_empty());
    assert!(reporter.is_empty());
    assert!(storage.fetch_all_sessions().is_empty());
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn crash_for_already_ended_session_is_attached() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir.path().join("storage"));
    let session = seed_ended_session(&storage, 3_000);

    let reporter = Arc::new(MemoryCrashReporter::new());
    reporter.add(crash_for(&session, "late-crash", 3_070));

    let server = backend(200).await;
    let uploader = uploader(&server, &dir.path().join("uploads"), fast_redundancy(0));
    let report = UnsentDataReconciler::new(storage.clone(), uploader)
        .with_crash_reporter(reporter.clone())
        .reconcile()
        .await
        .unwrap();

    assert_eq!(report.matched_crashes, vec!["late-crash".to_string()]);
    assert_eq!(requests_to(&server, BLOBS_PATH).await.len(), 1);

    let payload = json(&requests_to(&server, SESSIONS_PATH).await[0].body);
    assert_eq!(payload["s"]["crash_report_id"], "late-crash");
    assert_eq!(payload["s"]["et"], 3_060_000);
    assert_eq!(payload["ce"], true);
}

#[tokio::test]
async fn crash_report_survives_a_failed_staging_pass() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("uploads");
    let storage = open_storage(&dir.path().join("storage"));
    let session = seed_open_session(&storage, 1_000);

    let reporter = Arc::new(MemoryCrashReporter::new());
    reporter.add(crash_for(&session, "crash-7", 1_040));

    let server = backend(200).await;
    let broken = uploader(&server, &cache_dir, fast_redundancy(0));
    std::fs::remove_dir_all(&cache_dir).unwrap();
    std::fs::write(&cache_dir, b"not a directory").unwrap();

    let first = UnsentDataReconciler::new(storage.clone(), broken)
        .with_crash_reporter(reporter.clone())
        .reconcile()
        .await
        .unwrap();

    assert_eq!(first.failed.len(), 1);
    assert!(first.staged.is_empty());
    assert!(storage.fetch_session(session.id).is_some());
    assert!(!reporter.is_empty());

    std::fs::remove_file(&cache_dir).unwrap();
    let second = UnsentDataReconciler::new(storage.clone(), uploader(&server, &cache_dir, fast_redundancy(0)))
        .with_crash_reporter(reporter.clone())
        .reconcile()
        .await
        .unwrap();

    assert_eq!(second.staged, vec![session.id]);
    assert!(reporter.is_empty());
    assert_eq!(requests_to(&server, SESSIONS_PATH).await.len(), 1);
    assert_eq!(requests_to(&server, BLOBS_PATH).await.len(), 1);

    let blob = json(&requests_to(&server, BLOBS_PATH).await[0].body);
    assert_eq!(blob["id"], "crash-7");
}
