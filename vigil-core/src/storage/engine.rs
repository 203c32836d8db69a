//! The storage engine.

use super::compaction::{self, CompactionReport};
use super::config::StorageConfig;
use super::log::LogWriter;
use super::observer::{ObserverRegistry, SessionObservation};
use super::reader;
use super::record::Mutation;
use super::state::{ResourceKey, SessionDeletion, SessionSpans, SpanKey, SpanRecord, StorageState};
use crate::error::{Result, VigilError};
use crate::resource::{ResourceRecord, ResourceScope};
use crate::session::SessionRecord;
use crate::types::{ProcessId, SessionId};
use crate::value::AttributeValue;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Row counts and log statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Live sessions.
    pub sessions: usize,
    /// Live span rows.
    pub spans: usize,
    /// Live resources.
    pub resources: usize,
    /// Current log size in bytes.
    pub log_bytes: u64,
    /// Records appended since open.
    pub records_written: u64,
}

struct StorageInner {
    path: PathBuf,
    config: StorageConfig,
    writer: Mutex<LogWriter>,
    state: RwLock<StorageState>,
    observers: Arc<ObserverRegistry>,
    records_written: AtomicU64,
}

/// Durable store for sessions, span rows and resources.
///
/// Mutations are appended to the log and then applied to the in-memory
/// indexes while holding the writer lock, so they are totally ordered.
/// Reads only take the index read lock and run concurrently.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl Storage {
    /// Open or create the store described by `config`, replaying its log.
    pub fn open(config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.directory).map_err(|e| VigilError::StorageOpen {
            path: config.directory.clone(),
            cause: format!("Failed to create storage directory: {}", e),
        })?;

        let mut writer = LogWriter::open(&config)?;
        let path = writer.path().to_path_buf();

        let outcome = reader::replay(&path)?;
        match outcome.bad_length_at {
            Some(offset) => tracing::warn!(
                path = %path.display(),
                offset,
                discarded_bytes = outcome.torn_bytes,
                "Storage record length is corrupt, discarding it and every record after it"
            ),
            None if outcome.torn_bytes > 0 => tracing::warn!(
                path = %path.display(),
                torn_bytes = outcome.torn_bytes,
                "Discarding incomplete trailing storage record"
            ),
            None => {}
        }
        writer.truncate_to(outcome.valid_len)?;

        let mut state = StorageState::default();
        let mut applied = 0usize;
        for record in &outcome.records {
            match Mutation::from_record(record) {
                Ok(mutation) => {
                    state.apply(mutation);
                    applied += 1;
                }
                Err(e) => tracing::warn!(
                    key = %record.key,
                    error = %e,
                    "Skipping undecodable storage record"
                ),
            }
        }

        tracing::debug!(
            path = %path.display(),
            records = applied,
            skipped = outcome.skipped,
            sessions = state.sessions.len(),
            "Storage opened"
        );

        Ok(Self {
            inner: Arc::new(StorageInner {
                path,
                config,
                writer: Mutex::new(writer),
                state: RwLock::new(state),
                observers: Arc::new(ObserverRegistry::default()),
                records_written: AtomicU64::new(0),
            }),
        })
    }

    /// Open a throwaway store in a fresh temp directory.
    pub fn in_memory() -> Result<Self> {
        Self::open(StorageConfig::in_memory())
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    /// Insert a new session. Fails if the id already exists.
    pub fn add_session(&self, session: SessionRecord) -> Result<()> {
        self.mutate(|state| {
            if state.sessions.contains_key(&session.id) {
                return Err(VigilError::StorageConstraint {
                    cause: format!("Session {} already exists", session.id),
                });
            }
            Ok((vec![Mutation::UpsertSession(session)], ()))
        })
    }

    /// Insert or replace a session keyed by id.
    pub fn upsert_session(&self, session: SessionRecord) -> Result<()> {
        self.mutate(|_| Ok((vec![Mutation::UpsertSession(session)], ())))
    }

    /// Read-modify-write a session.
    pub fn update_session<F>(&self, id: SessionId, f: F) -> Result<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord),
    {
        self.mutate(|state| {
            let mut session = state
                .sessions
                .get(&id)
                .cloned()
                .ok_or(VigilError::SessionNotFound { session_id: id })?;
            f(&mut session);
            Ok((vec![Mutation::UpsertSession(session.clone())], session))
        })
    }

    /// Fetch a session by id.
    pub fn fetch_session(&self, id: SessionId) -> Option<SessionRecord> {
        self.inner.state.read().sessions.get(&id).cloned()
    }

    /// The session with the latest start time.
    pub fn fetch_latest_session(&self) -> Option<SessionRecord> {
        self.inner.state.read().latest_session().cloned()
    }

    /// The session with the earliest start time.
    pub fn fetch_oldest_session(&self) -> Option<SessionRecord> {
        self.inner.state.read().oldest_session().cloned()
    }

    /// All sessions ordered by start time.
    pub fn fetch_all_sessions(&self) -> Vec<SessionRecord> {
        self.inner.state.read().sessions_by_start()
    }

    /// Delete a session with its spans and session-scoped resources.
    ///
    /// Process-scoped resources of other processes that no longer own any
    /// session are removed too. Returns whether the session existed.
    pub fn delete_session(&self, id: SessionId) -> Result<bool> {
        self.mutate(|state| {
            if !state.sessions.contains_key(&id) {
                return Ok((Vec::new(), false));
            }
            let deletion = SessionDeletion {
                session_id: id,
                process_id: ProcessId::current(),
            };
            Ok((vec![Mutation::DeleteSession(deletion)], true))
        })
    }

    /// Register `observer` for the session list.
    ///
    /// The observer is called once with the current list, then after every
    /// session change until the returned handle is cancelled or dropped.
    pub fn observe_sessions<F>(&self, observer: F) -> SessionObservation
    where
        F: Fn(&[SessionRecord]) + Send + Sync + 'static,
    {
        let observer: super::observer::SessionObserver = Arc::new(observer);
        let observation = self.inner.observers.register(observer.clone());
        observer(&self.fetch_all_sessions());
        observation
    }

    // -------------------------------------------------------------------------
    // Spans
    // -------------------------------------------------------------------------

    /// Insert or replace a span row keyed by trace and span id.
    pub fn upsert_span(&self, span: SpanRecord) -> Result<()> {
        self.mutate(|_| Ok((vec![Mutation::UpsertSpan(span)], ())))
    }

    /// Fetch one span row.
    pub fn fetch_span(&self, key: SpanKey) -> Option<SpanRecord> {
        self.inner.state.read().spans.get(&key).cloned()
    }

    /// Spans of a session split into completed spans and in-flight snapshots.
    pub fn fetch_spans_for_session(&self, id: SessionId) -> SessionSpans {
        self.inner.state.read().spans_for_session(id)
    }

    /// Delete one span row.
    pub fn delete_span(&self, key: SpanKey) -> Result<bool> {
        self.mutate(|state| {
            if !state.spans.contains_key(&key) {
                return Ok((Vec::new(), false));
            }
            Ok((vec![Mutation::DeleteSpan(key)], true))
        })
    }

    // -------------------------------------------------------------------------
    // Resources
    // -------------------------------------------------------------------------

    /// Insert or replace a resource keyed by `(scope, key)`.
    pub fn add_resource(
        &self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
        scope: ResourceScope,
    ) -> Result<ResourceRecord> {
        let resource = ResourceRecord::new(key, value, scope);
        self.mutate(|_| Ok((vec![Mutation::UpsertResource(resource.clone())], resource)))
    }

    /// Fetch a resource.
    pub fn fetch_resource(&self, key: &str, scope: ResourceScope) -> Option<ResourceRecord> {
        self.inner
            .state
            .read()
            .resources
            .get(&ResourceKey::new(key, scope))
            .cloned()
    }

    /// Fetch a permanent resource.
    pub fn fetch_permanent_resource(&self, key: &str) -> Option<ResourceRecord> {
        self.fetch_resource(key, ResourceScope::Permanent)
    }

    /// Resources visible to `session`: its own, its process's and the
    /// permanent ones.
    pub fn fetch_resources_for_session(&self, session: &SessionRecord) -> Vec<ResourceRecord> {
        self.inner.state.read().resources_for_session(session)
    }

    /// Atomically compute a resource's new value from its current one.
    pub fn update_resource<F>(&self, key: &str, scope: ResourceScope, f: F) -> Result<ResourceRecord>
    where
        F: FnOnce(Option<&AttributeValue>) -> AttributeValue,
    {
        self.mutate(|state| {
            let current = state.resources.get(&ResourceKey::new(key, scope));
            let value = f(current.map(|r| &r.value));
            let resource = ResourceRecord::new(key, value, scope);
            Ok((vec![Mutation::UpsertResource(resource.clone())], resource))
        })
    }

    /// Delete a resource.
    pub fn delete_resource(&self, key: &str, scope: ResourceScope) -> Result<bool> {
        let key = ResourceKey::new(key, scope);
        self.mutate(|state| {
            if !state.resources.contains_key(&key) {
                return Ok((Vec::new(), false));
            }
            Ok((vec![Mutation::DeleteResource(key)], true))
        })
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Flush and fsync pending writes.
    pub fn flush(&self) -> Result<()> {
        self.inner.writer.lock().sync()
    }

    /// Rewrite the log so it holds only live rows.
    pub fn compact(&self) -> Result<CompactionReport> {
        let mut writer = self.inner.writer.lock();
        let state = self.inner.state.read();
        compaction::compact(&mut writer, &state, Utc::now().timestamp_millis())
    }

    /// Row counts and log size.
    pub fn stats(&self) -> StorageStats {
        let log_bytes = self.inner.writer.lock().file_size();
        let state = self.inner.state.read();
        StorageStats {
            sessions: state.sessions.len(),
            spans: state.spans.len(),
            resources: state.resources.len(),
            log_bytes,
            records_written: self.inner.records_written.load(Ordering::Relaxed),
        }
    }

    /// Run `plan` against the current state under the writer lock, then
    /// append and apply the mutations it returns.
    fn mutate<T, F>(&self, plan: F) -> Result<T>
    where
        F: FnOnce(&StorageState) -> Result<(Vec<Mutation>, T)>,
    {
        let mut writer = self.inner.writer.lock();
        let (mutations, value) = plan(&self.inner.state.read())?;
        if mutations.is_empty() {
            return Ok(value);
        }

        let touches_sessions = mutations.iter().any(Mutation::touches_sessions);
        let timestamp_ms = Utc::now().timestamp_millis();

        for mutation in mutations {
            let record = mutation.to_record(timestamp_ms)?;
            writer.append(&record)?;
            self.inner.records_written.fetch_add(1, Ordering::Relaxed);
            self.inner.state.write().apply(mutation);
        }
        writer.commit()?;

        let over_threshold = self
            .inner
            .config
            .compaction_threshold
            .is_some_and(|threshold| writer.should_compact(threshold));
        if over_threshold {
            let state = self.inner.state.read();
            match compaction::compact(&mut writer, &state, timestamp_ms) {
                Ok(report) => tracing::debug!(
                    bytes_before = report.bytes_before,
                    bytes_after = report.bytes_after,
                    "Storage log compacted"
                ),
                Err(e) => tracing::warn!(error = %e, "Storage compaction failed"),
            }
        }
        drop(writer);

        if touches_sessions && !self.inner.observers.is_empty() {
            self.inner.observers.notify(&self.fetch_all_sessions());
        }

        Ok(value)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{SpanData, SpanStatus, SpanType};
    use crate::types::{SpanId, TraceId};
    use chrono::{DateTime, TimeZone};
    use parking_lot::Mutex as PlMutex;
    use tempfile::tempdir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn open(dir: &Path) -> Storage {
        Storage::open(StorageConfig::default().with_directory(dir).with_sync(false)).unwrap()
    }

    fn span(name: &str, start: i64, end: Option<i64>) -> SpanData {
        SpanData {
            trace_id: TraceId::new(),
            span_id: SpanId::new(),
            parent_span_id: None,
            name: name.to_string(),
            span_type: SpanType::Performance,
            start_time: at(start),
            end_time: end.map(at),
            status: SpanStatus::Unset,
            attributes: Default::default(),
            events: Vec::new(),
        }
    }

    #[test]
    fn add_and_fetch_session() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let session = SessionRecord::new(SessionId::new(), ProcessId::current(), at(100));
        storage.add_session(session.clone()).unwrap();

        assert_eq!(storage.fetch_session(session.id), Some(session));
    }

    #[test]
    fn add_session_rejects_duplicate() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let session = SessionRecord::new(SessionId::new(), ProcessId::current(), at(100));
        storage.add_session(session.clone()).unwrap();
        let err = storage.add_session(session).unwrap_err();
        assert_eq!(err.code(), "E106");
    }

    #[test]
    fn upsert_replaces_in_place() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let mut session = SessionRecord::new(SessionId::new(), ProcessId::current(), at(100));
        storage.upsert_session(session.clone()).unwrap();
        session.end_time = Some(at(200));
        storage.upsert_session(session.clone()).unwrap();

        let all = storage.fetch_all_sessions();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].end_time, Some(at(200)));
    }

    #[test]
    fn update_missing_session_fails() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());
        let err = storage
            .update_session(SessionId::new(), |s| s.cold_start = true)
            .unwrap_err();
        assert_eq!(err.code(), "E601");
    }

    #[test]
    fn delete_session_cascades() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let session = SessionRecord::new(SessionId::new(), ProcessId::current(), at(100));
        let other = SessionRecord::new(SessionId::new(), ProcessId::current(), at(300));
        storage.add_session(session.clone()).unwrap();
        storage.add_session(other.clone()).unwrap();

        storage
            .upsert_span(SpanRecord::new(session.id, span("a", 100, Some(110))))
            .unwrap();
        storage
            .upsert_span(SpanRecord::new(other.id, span("b", 300, None)))
            .unwrap();
        storage
            .add_resource("k", "v", ResourceScope::Session(session.id))
            .unwrap();
        storage
            .add_resource("k", "w", ResourceScope::Session(other.id))
            .unwrap();

        assert!(storage.delete_session(session.id).unwrap());
        assert!(!storage.delete_session(session.id).unwrap());

        assert!(storage.fetch_session(session.id).is_none());
        assert!(storage.fetch_spans_for_session(session.id).completed.is_empty());
        assert!(storage
            .fetch_resource("k", ResourceScope::Session(session.id))
            .is_none());

        assert_eq!(storage.fetch_spans_for_session(other.id).snapshots.len(), 1);
        assert!(storage
            .fetch_resource("k", ResourceScope::Session(other.id))
            .is_some());
    }

    #[test]
    fn delete_collects_orphaned_process_resources() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let old_process = ProcessId::random();
        let old = SessionRecord::new(SessionId::new(), old_process, at(100));
        storage.add_session(old.clone()).unwrap();
        storage
            .add_resource("emb.device.model", "x", ResourceScope::Process(old_process))
            .unwrap();
        storage
            .add_resource("emb.device.model", "y", ResourceScope::Process(ProcessId::current()))
            .unwrap();

        storage.delete_session(old.id).unwrap();

        assert!(storage
            .fetch_resource("emb.device.model", ResourceScope::Process(old_process))
            .is_none());
        assert!(storage
            .fetch_resource("emb.device.model", ResourceScope::Process(ProcessId::current()))
            .is_some());
    }

    #[test]
    fn spans_split_into_completed_and_snapshots() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());
        let id = SessionId::new();

        storage.upsert_span(SpanRecord::new(id, span("done", 10, Some(20)))).unwrap();
        let mut open_span = span("open", 15, None);
        storage.upsert_span(SpanRecord::new(id, open_span.clone())).unwrap();

        let spans = storage.fetch_spans_for_session(id);
        assert_eq!(spans.completed.len(), 1);
        assert_eq!(spans.snapshots.len(), 1);

        open_span.end_time = Some(at(30));
        storage.upsert_span(SpanRecord::new(id, open_span)).unwrap();
        let spans = storage.fetch_spans_for_session(id);
        assert_eq!(spans.completed.len(), 2);
        assert!(spans.snapshots.is_empty());
    }

    #[test]
    fn resources_visible_to_session() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let session = SessionRecord::new(SessionId::new(), ProcessId::current(), at(100));
        storage.add_resource("perm", 1i64, ResourceScope::Permanent).unwrap();
        storage
            .add_resource("proc", 2i64, ResourceScope::Process(ProcessId::current()))
            .unwrap();
        storage
            .add_resource("sess", 3i64, ResourceScope::Session(session.id))
            .unwrap();
        storage
            .add_resource("other", 4i64, ResourceScope::Session(SessionId::new()))
            .unwrap();

        let keys: Vec<_> = storage
            .fetch_resources_for_session(&session)
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&"perm".to_string()));
        assert!(keys.contains(&"proc".to_string()));
        assert!(keys.contains(&"sess".to_string()));
    }

    #[test]
    fn update_resource_is_read_modify_write() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        for _ in 0..3 {
            storage
                .update_resource("counter", ResourceScope::Permanent, |current| {
                    AttributeValue::Int(current.and_then(AttributeValue::as_i64).unwrap_or(0) + 1)
                })
                .unwrap();
        }

        assert_eq!(
            storage.fetch_permanent_resource("counter").unwrap().value,
            AttributeValue::Int(3)
        );
    }

    #[test]
    fn observer_receives_updates_until_cancelled() {
        let dir = tempdir().unwrap();
        let storage = open(dir.path());

        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        let observation = storage.observe_sessions(move |sessions| {
            sink.lock().push(sessions.len());
        });

        storage
            .add_session(SessionRecord::new(SessionId::new(), ProcessId::current(), at(1)))
            .unwrap();
        storage
            .add_resource("ignored", true, ResourceScope::Permanent)
            .unwrap();
        observation.cancel();
        storage
            .add_session(SessionRecord::new(SessionId::new(), ProcessId::current(), at(2)))
            .unwrap();

        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _storage = open(dir.path());

        let err = Storage::open(StorageConfig::default().with_directory(dir.path())).unwrap_err();
        assert_eq!(err.code(), "E107");
    }

    #[test]
    fn compaction_keeps_live_rows() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(
            StorageConfig::default()
                .with_directory(dir.path())
                .with_sync(false)
                .with_compaction_threshold(None),
        )
        .unwrap();

        let keep = SessionRecord::new(SessionId::new(), ProcessId::current(), at(1));
        storage.add_session(keep.clone()).unwrap();
        for i in 0..20 {
            let s = SessionRecord::new(SessionId::new(), ProcessId::current(), at(10 + i));
            storage.add_session(s.clone()).unwrap();
            storage.delete_session(s.id).unwrap();
        }

        let report = storage.compact().unwrap();
        assert!(report.bytes_after < report.bytes_before);
        assert_eq!(report.records, 1);
        assert_eq!(storage.fetch_all_sessions(), vec![keep.clone()]);

        storage
            .add_session(SessionRecord::new(SessionId::new(), ProcessId::current(), at(99)))
            .unwrap();
        drop(storage);

        let reopened = open(dir.path());
        assert_eq!(reopened.fetch_all_sessions().len(), 2);
        assert_eq!(reopened.fetch_oldest_session(), Some(keep));
    }
}
