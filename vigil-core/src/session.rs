//! Session records.

use crate::types::{ProcessId, SessionId, SpanId, TraceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Application state during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// The application is in the foreground.
    #[default]
    Foreground,
    /// The application is in the background.
    Background,
}

impl SessionState {
    /// Wire tag for the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted session row.
///
/// A session with no `end_time` is active. If it survives a process restart
/// it is a crash candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identifier.
    pub id: SessionId,
    /// Process that owns the session.
    pub process_id: ProcessId,
    /// Trace of the root session span.
    pub trace_id: TraceId,
    /// Root session span.
    pub span_id: SpanId,
    /// Foreground/background state.
    pub state: SessionState,
    /// When the session started.
    pub start_time: DateTime<Utc>,
    /// When the session ended, if it has.
    pub end_time: Option<DateTime<Utc>>,
    /// Last heartbeat written while the session was active.
    pub last_heartbeat_time: DateTime<Utc>,
    /// Crash report correlated with this session.
    pub crash_report_id: Option<String>,
    /// Whether the session began with a full process launch.
    pub cold_start: bool,
    /// Whether the session ended through a normal lifecycle transition.
    pub clean_exit: bool,
    /// Whether the app was terminated while this session was active.
    pub app_terminated: bool,
}

impl SessionRecord {
    /// Create an open foreground session starting at `start_time`.
    #[must_use]
    pub fn new(id: SessionId, process_id: ProcessId, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            process_id,
            trace_id: TraceId::new(),
            span_id: SpanId::new(),
            state: SessionState::Foreground,
            start_time,
            end_time: None,
            last_heartbeat_time: start_time,
            crash_report_id: None,
            cold_start: false,
            clean_exit: false,
            app_terminated: false,
        }
    }

    /// Set the root span identifiers.
    #[must_use]
    pub fn with_span(mut self, trace_id: TraceId, span_id: SpanId) -> Self {
        self.trace_id = trace_id;
        self.span_id = span_id;
        self
    }

    /// Set the initial state.
    #[must_use]
    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = state;
        self
    }

    /// Mark the session as a cold start.
    #[must_use]
    pub fn with_cold_start(mut self, cold_start: bool) -> Self {
        self.cold_start = cold_start;
        self
    }

    /// Set the end time.
    #[must_use]
    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Whether the session is still open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// Close the session through a normal lifecycle transition.
    pub fn close(&mut self, end_time: DateTime<Utc>, app_terminated: bool) {
        self.end_time = Some(end_time);
        self.clean_exit = true;
        self.app_terminated = app_terminated;
    }

    /// Close the session as a crash identified by `crash_report_id`.
    pub fn close_with_crash(&mut self, crash_report_id: &str, timestamp: DateTime<Utc>) {
        self.end_time = Some(timestamp);
        self.clean_exit = false;
        self.app_terminated = true;
        self.crash_report_id = Some(crash_report_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn new_session_is_active() {
        let session = SessionRecord::new(SessionId::new(), ProcessId::current(), at(100));
        assert!(session.is_active());
        assert_eq!(session.state, SessionState::Foreground);
        assert_eq!(session.last_heartbeat_time, at(100));
    }

    #[test]
    fn crash_close_sets_flags() {
        let mut session = SessionRecord::new(SessionId::new(), ProcessId::current(), at(100));
        session.close_with_crash("crash-1", at(150));

        assert_eq!(session.end_time, Some(at(150)));
        assert!(!session.clean_exit);
        assert!(session.app_terminated);
        assert_eq!(session.crash_report_id.as_deref(), Some("crash-1"));
    }

    #[test]
    fn clean_close_sets_flags() {
        let mut session = SessionRecord::new(SessionId::new(), ProcessId::current(), at(100));
        session.close(at(120), false);
        assert!(!session.is_active());
        assert!(session.clean_exit);
        assert!(!session.app_terminated);
    }

    #[test]
    fn state_serializes_as_tag() {
        assert_eq!(
            serde_json::to_string(&SessionState::Background).unwrap(),
            "\"background\""
        );
    }
}
