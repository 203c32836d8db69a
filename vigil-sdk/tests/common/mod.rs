//! Shared fixtures for pipeline tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::path::Path;
use std::time::Duration;
use vigil_sdk::crash::{CrashReport, CrashReporter, CrashReportsFuture};
use vigil_sdk::prelude::*;
use vigil_upload::{CacheOptions, EndpointOptions, MetadataOptions, UploadOptions};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const SESSIONS_PATH: &str = "/v1/log/sessions";
pub const BLOBS_PATH: &str = "/v1/log/blobs";
pub const APP_ID: &str = "a1b2c";

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

/// Backend answering every POST to both endpoints with `status`.
pub async fn backend(status: u16) -> MockServer {
    let server = MockServer::start().await;
    for endpoint in [SESSIONS_PATH, BLOBS_PATH] {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }
    server
}

pub async fn requests_to(server: &MockServer, endpoint: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == endpoint)
        .collect()
}

pub fn fast_redundancy(retries: u32) -> RedundancyOptions {
    RedundancyOptions::default()
        .with_automatic_retry_count(retries)
        .with_retry_base_delay(Duration::from_millis(1))
}

pub fn uploader(server: &MockServer, cache_dir: &Path, redundancy: RedundancyOptions) -> Uploader {
    let endpoints = EndpointOptions::new(
        &format!("{}{}", server.uri(), SESSIONS_PATH),
        &format!("{}{}", server.uri(), BLOBS_PATH),
    )
    .unwrap();
    let options = UploadOptions::new(
        endpoints,
        CacheOptions::new(cache_dir),
        MetadataOptions::new(APP_ID, "vigil-tests/1.0", "0123ABCD"),
    )
    .with_redundancy(redundancy)
    .with_request_timeout(Duration::from_secs(5));
    Uploader::new(options).unwrap()
}

pub fn vigil_options(server: &MockServer, data_dir: &Path) -> VigilOptions {
    VigilOptions::new(APP_ID, server.uri(), data_dir)
        .with_redundancy(fast_redundancy(0))
        .with_heartbeat_interval(Duration::from_millis(20))
        .with_request_timeout(Duration::from_secs(5))
        .with_sync_storage(false)
}

pub fn open_storage(dir: &Path) -> Storage {
    Storage::open(StorageConfig::default().with_directory(dir).with_sync(false)).unwrap()
}

/// Open session owned by a process that no longer runs, with one completed
/// span and one in-flight snapshot.
pub fn seed_open_session(storage: &Storage, start: i64) -> SessionRecord {
    let mut session = SessionRecord::new(SessionId::new(), ProcessId::random(), at(start))
        .with_cold_start(true);
    session.last_heartbeat_time = at(start + 30);
    storage.add_session(session.clone()).unwrap();

    let tracer = Tracer::new(std::sync::Arc::new(NoopSpanProcessor));
    let completed = tracer
        .span_builder("load-feed", SpanType::Performance)
        .with_start_time(at(start + 1))
        .record_completed(at(start + 2), Vec::new());
    storage
        .upsert_span(SpanRecord::new(session.id, completed))
        .unwrap();

    let in_flight = tracer
        .span_builder("checkout", SpanType::Ux)
        .with_start_time(at(start + 3))
        .start()
        .snapshot();
    storage
        .upsert_span(SpanRecord::new(session.id, in_flight))
        .unwrap();

    session
}

/// Session that ended cleanly.
pub fn seed_ended_session(storage: &Storage, start: i64) -> SessionRecord {
    let mut session = SessionRecord::new(SessionId::new(), ProcessId::random(), at(start));
    session.close(at(start) + ChronoDuration::seconds(60), false);
    storage.add_session(session.clone()).unwrap();
    session
}

pub fn crash_for(session: &SessionRecord, id: &str, timestamp: i64) -> CrashReport {
    CrashReport::new(id, Some(session.id), Some(at(timestamp)))
        .with_report(serde_json::json!({ "signal": "SIGSEGV", "frames": ["main", "run"] }))
}

/// Collector whose backlog cannot be read.
#[derive(Debug, Default)]
pub struct FailingCrashReporter;

impl CrashReporter for FailingCrashReporter {
    fn fetch_unsent_crash_reports(&self) -> CrashReportsFuture<'_> {
        Box::pin(async {
            Err(VigilError::CrashReportFetch {
                cause: "collector database is locked".to_string(),
            })
        })
    }

    fn delete_crash_report(&self, _id: &str) -> vigil_core::Result<()> {
        Ok(())
    }

    fn set_current_session(&self, _session_id: Option<SessionId>) {}
}
