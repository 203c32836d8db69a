//! Persists span lifecycle into storage.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use vigil_core::prelude::*;
use vigil_core::storage::SpanKey;

/// Shared slot naming the session new spans belong to.
#[derive(Debug, Clone, Default)]
pub struct CurrentSession(Arc<RwLock<Option<SessionId>>>);

impl CurrentSession {
    /// The current session, if any.
    pub fn get(&self) -> Option<SessionId> {
        *self.0.read()
    }

    /// Replace the current session.
    pub fn set(&self, session_id: Option<SessionId>) {
        *self.0.write() = session_id;
    }
}

/// Span processor that writes span rows to [`Storage`].
///
/// A span belongs to the session that was current when it started. Spans
/// started outside any session, or whose session was already handed to the
/// upload cache, are adopted by the session current when they end. Each
/// start writes an in-flight snapshot and each end overwrites it, so a crash
/// leaves the latest known state on disk.
pub struct StorageSpanProcessor {
    storage: Storage,
    current: CurrentSession,
    owners: DashMap<SpanKey, SessionId>,
}

impl StorageSpanProcessor {
    /// Processor writing into `storage`.
    pub fn new(storage: Storage, current: CurrentSession) -> Self {
        Self {
            storage,
            current,
            owners: DashMap::new(),
        }
    }

    /// Spans started but not yet ended.
    pub fn in_flight(&self) -> usize {
        self.owners.len()
    }

    /// Drop ownership of spans started in `session_id`. Called once the
    /// session has ended; any of its spans ending later are adopted by the
    /// then-current session.
    pub fn release_session(&self, session_id: SessionId) {
        let before = self.owners.len();
        self.owners.retain(|_, owner| *owner != session_id);
        let released = before.saturating_sub(self.owners.len());
        if released > 0 {
            tracing::debug!(session_id = %session_id, released, "Released spans left open by an ended session");
        }
    }

    fn persist(&self, session_id: SessionId, span: &SpanData) {
        if let Err(e) = self.storage.upsert_span(SpanRecord::new(session_id, span.clone())) {
            tracing::warn!(
                session_id = %session_id,
                span = %span.name,
                error = %e,
                "Failed to persist span"
            );
        }
    }
}

fn key_of(span: &SpanData) -> SpanKey {
    SpanKey {
        trace_id: span.trace_id,
        span_id: span.span_id,
    }
}

impl SpanProcessor for StorageSpanProcessor {
    fn on_start(&self, span: &SpanData) {
        if let Some(session_id) = self.current.get() {
            self.owners.insert(key_of(span), session_id);
            self.persist(session_id, span);
        }
    }

    fn on_end(&self, span: &SpanData) {
        let owner = self
            .owners
            .remove(&key_of(span))
            .map(|(_, session_id)| session_id)
            .filter(|session_id| self.storage.fetch_session(*session_id).is_some())
            .or_else(|| self.current.get());

        match owner {
            Some(session_id) => self.persist(session_id, span),
            None => tracing::debug!(span = %span.name, "Span ended outside any session, not persisted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Storage, CurrentSession, Tracer) {
        let storage = Storage::in_memory().unwrap();
        let current = CurrentSession::default();
        let processor = Arc::new(StorageSpanProcessor::new(storage.clone(), current.clone()));
        (storage, current, Tracer::new(processor))
    }

    #[test]
    fn snapshot_then_completed_row() {
        let (storage, current, tracer) = setup();
        let session_id = SessionId::new();
        current.set(Some(session_id));

        let span = tracer.start_span("load", SpanType::Performance, Attributes::new());
        let spans = storage.fetch_spans_for_session(session_id);
        assert_eq!(spans.snapshots.len(), 1);
        assert!(spans.completed.is_empty());

        span.end();
        let spans = storage.fetch_spans_for_session(session_id);
        assert!(spans.snapshots.is_empty());
        assert_eq!(spans.completed.len(), 1);
        assert_eq!(spans.completed[0].status, SpanStatus::Ok);
    }

    fn stored_session(storage: &Storage) -> SessionId {
        let session = SessionRecord::new(SessionId::new(), ProcessId::current(), Utc::now());
        storage.add_session(session.clone()).unwrap();
        session.id
    }

    #[test]
    fn span_stays_with_its_starting_session() {
        let (storage, current, tracer) = setup();
        let first = stored_session(&storage);
        current.set(Some(first));
        let span = tracer.start_span("upload", SpanType::Performance, Attributes::new());

        let second = stored_session(&storage);
        current.set(Some(second));
        span.end();

        assert_eq!(storage.fetch_spans_for_session(first).completed.len(), 1);
        assert!(storage.fetch_spans_for_session(second).completed.is_empty());
    }

    #[test]
    fn orphan_span_is_adopted_at_end() {
        let (storage, current, tracer) = setup();
        let span = tracer.start_span("launch", SpanType::Performance, Attributes::new());
        assert_eq!(storage.stats().spans, 0);

        let session_id = SessionId::new();
        current.set(Some(session_id));
        span.end();
        assert_eq!(storage.fetch_spans_for_session(session_id).completed.len(), 1);
    }

    #[test]
    fn span_of_staged_session_moves_to_current() {
        let (storage, current, tracer) = setup();
        let first = stored_session(&storage);
        current.set(Some(first));
        let span = tracer.start_span("download", SpanType::Performance, Attributes::new());

        storage.delete_session(first).unwrap();
        let second = stored_session(&storage);
        current.set(Some(second));
        span.end();

        assert!(storage.fetch_spans_for_session(first).completed.is_empty());
        assert_eq!(storage.fetch_spans_for_session(second).completed.len(), 1);
        assert_eq!(storage.stats().spans, 1);
    }

    #[test]
    fn released_session_no_longer_owns_open_spans() {
        let storage = Storage::in_memory().unwrap();
        let current = CurrentSession::default();
        let processor = Arc::new(StorageSpanProcessor::new(storage.clone(), current.clone()));
        let tracer = Tracer::new(processor.clone());

        let first = stored_session(&storage);
        current.set(Some(first));
        let leaked = tracer.start_span("never-ended", SpanType::Performance, Attributes::new());
        let _other = tracer.start_span("also-open", SpanType::Performance, Attributes::new());
        assert_eq!(processor.in_flight(), 2);

        processor.release_session(first);
        assert_eq!(processor.in_flight(), 0);

        let second = stored_session(&storage);
        current.set(Some(second));
        leaked.end();
        assert_eq!(storage.fetch_spans_for_session(second).completed.len(), 1);
        assert!(storage.fetch_spans_for_session(first).completed.is_empty());
    }

    #[test]
    fn spans_without_session_are_dropped() {
        let (storage, _current, tracer) = setup();
        tracer.record_span("idle", SpanType::System, |_| ());
        assert_eq!(storage.stats().spans, 0);
    }
}
