//! In-memory indexes rebuilt from the log.

use super::record::Mutation;
use crate::resource::{ResourceRecord, ResourceScope};
use crate::session::SessionRecord;
use crate::span::SpanData;
use crate::types::{ProcessId, SessionId, SpanId, TraceId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A span row owned by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Owning session.
    pub session_id: SessionId,
    /// Span contents. A row without an end time is an in-flight snapshot.
    pub data: SpanData,
}

impl SpanRecord {
    /// Create a span row.
    pub fn new(session_id: SessionId, data: SpanData) -> Self {
        Self { session_id, data }
    }

    /// Primary key of the row.
    pub fn key(&self) -> SpanKey {
        SpanKey {
            trace_id: self.data.trace_id,
            span_id: self.data.span_id,
        }
    }
}

/// Primary key of a span row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanKey {
    /// Trace identifier.
    pub trace_id: TraceId,
    /// Span identifier.
    pub span_id: SpanId,
}

impl fmt::Display for SpanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.trace_id, self.span_id)
    }
}

/// Primary key of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Resource scope.
    pub scope: ResourceScope,
    /// Key within the scope.
    pub key: String,
}

impl ResourceKey {
    /// Create a resource key.
    pub fn new(key: impl Into<String>, scope: ResourceScope) -> Self {
        Self {
            scope,
            key: key.into(),
        }
    }
}

/// Body of a cascading session delete.
///
/// `process_id` is the process that issued the delete. Its process-scoped
/// resources are never collected by the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDeletion {
    /// Session to delete.
    pub session_id: SessionId,
    /// Process that issued the delete.
    pub process_id: ProcessId,
}

/// Spans of one session, split by completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSpans {
    /// Spans with an end time.
    pub completed: Vec<SpanData>,
    /// Spans still recording when last persisted.
    pub snapshots: Vec<SpanData>,
}

/// Live rows.
#[derive(Debug, Default)]
pub(crate) struct StorageState {
    pub sessions: HashMap<SessionId, SessionRecord>,
    pub spans: HashMap<SpanKey, SpanRecord>,
    pub resources: HashMap<ResourceKey, ResourceRecord>,
}

impl StorageState {
    pub fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::UpsertSession(session) => {
                self.sessions.insert(session.id, session);
            }
            Mutation::DeleteSession(deletion) => self.delete_session(deletion),
            Mutation::UpsertSpan(span) => {
                self.spans.insert(span.key(), span);
            }
            Mutation::DeleteSpan(key) => {
                self.spans.remove(&key);
            }
            Mutation::UpsertResource(resource) => {
                let key = ResourceKey::new(resource.key.clone(), resource.scope);
                self.resources.insert(key, resource);
            }
            Mutation::DeleteResource(key) => {
                self.resources.remove(&key);
            }
        }
    }

    fn delete_session(&mut self, deletion: SessionDeletion) {
        let id = deletion.session_id;
        self.sessions.remove(&id);
        self.spans.retain(|_, span| span.session_id != id);

        let live_processes: HashSet<ProcessId> =
            self.sessions.values().map(|s| s.process_id).collect();

        self.resources.retain(|key, _| match key.scope {
            ResourceScope::Session(owner) => owner != id,
            ResourceScope::Process(owner) => {
                owner == deletion.process_id || live_processes.contains(&owner)
            }
            ResourceScope::Permanent => true,
        });
    }

    pub fn sessions_by_start(&self) -> Vec<SessionRecord> {
        let mut sessions: Vec<_> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        sessions
    }

    pub fn latest_session(&self) -> Option<&SessionRecord> {
        self.sessions
            .values()
            .max_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)))
    }

    pub fn oldest_session(&self) -> Option<&SessionRecord> {
        self.sessions
            .values()
            .min_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)))
    }

    pub fn spans_for_session(&self, session_id: SessionId) -> SessionSpans {
        let mut spans: Vec<&SpanRecord> = self
            .spans
            .values()
            .filter(|span| span.session_id == session_id)
            .collect();
        spans.sort_by(|a, b| {
            a.data
                .start_time
                .cmp(&b.data.start_time)
                .then(a.data.span_id.cmp(&b.data.span_id))
        });

        let mut result = SessionSpans::default();
        for span in spans {
            if span.data.is_recording() {
                result.snapshots.push(span.data.clone());
            } else {
                result.completed.push(span.data.clone());
            }
        }
        result
    }

    pub fn resources_for_session(&self, session: &SessionRecord) -> Vec<ResourceRecord> {
        let mut resources: Vec<_> = self
            .resources
            .values()
            .filter(|r| match r.scope {
                ResourceScope::Permanent => true,
                ResourceScope::Session(owner) => owner == session.id,
                ResourceScope::Process(owner) => owner == session.process_id,
            })
            .cloned()
            .collect();
        resources.sort_by(|a, b| a.scope.cmp(&b.scope).then(a.key.cmp(&b.key)));
        resources
    }

    /// Mutations that recreate the current state from scratch.
    pub fn snapshot_mutations(&self) -> Vec<Mutation> {
        let mut mutations = Vec::with_capacity(
            self.sessions.len() + self.spans.len() + self.resources.len(),
        );
        mutations.extend(self.sessions_by_start().into_iter().map(Mutation::UpsertSession));
        mutations.extend(self.spans.values().cloned().map(Mutation::UpsertSpan));
        mutations.extend(self.resources.values().cloned().map(Mutation::UpsertResource));
        mutations
    }
}
