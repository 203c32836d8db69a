//! Session state machine.

use crate::crash::{CrashReport, CrashReporter};
use crate::processor::CurrentSession;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use vigil_core::prelude::*;

/// Name of the root span every session records.
pub const SESSION_SPAN_NAME: &str = "emb-session";

/// Attribute on the root span carrying the session id.
pub const SESSION_ID_ATTRIBUTE: &str = "session.id";

struct ActiveSession {
    id: SessionId,
    span: RecordingSpan,
}

/// Owns the current session: start, state changes, heartbeats and end.
///
/// At most one session is active per controller. Starting a session while
/// another is active ends the previous one first.
pub struct SessionController {
    storage: Storage,
    tracer: Tracer,
    current: CurrentSession,
    crash_reporter: Option<Arc<dyn CrashReporter>>,
    active: Mutex<Option<ActiveSession>>,
    cold_start_pending: AtomicBool,
}

impl SessionController {
    /// Controller writing sessions to `storage`.
    ///
    /// `current` must be the slot shared with the tracer's span processor.
    pub fn new(storage: Storage, tracer: Tracer, current: CurrentSession) -> Self {
        Self {
            storage,
            tracer,
            current,
            crash_reporter: None,
            active: Mutex::new(None),
            cold_start_pending: AtomicBool::new(true),
        }
    }

    /// Keep `reporter` informed of the current session.
    pub fn with_crash_reporter(mut self, reporter: Arc<dyn CrashReporter>) -> Self {
        self.crash_reporter = Some(reporter);
        self
    }

    /// Backing storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Id of the active session.
    pub fn current_session_id(&self) -> Option<SessionId> {
        self.active.lock().as_ref().map(|active| active.id)
    }

    /// The active session as stored.
    pub fn current_session(&self) -> Option<SessionRecord> {
        self.current_session_id()
            .and_then(|id| self.storage.fetch_session(id))
    }

    /// Start a session in `state`, ending any active one.
    pub fn start_session(&self, state: SessionState) -> Result<SessionRecord> {
        let mut active = self.active.lock();
        if active.is_some() {
            self.end_locked(&mut active, false)?;
        }

        let id = SessionId::new();
        let now = self.tracer.clock().now();
        self.current.set(Some(id));

        let span = self
            .tracer
            .span_builder(SESSION_SPAN_NAME, SpanType::Session)
            .with_start_time(now)
            .with_attribute(SESSION_ID_ATTRIBUTE, id.to_string())
            .start();

        let record = SessionRecord::new(id, ProcessId::current(), now)
            .with_span(span.trace_id(), span.span_id())
            .with_state(state)
            .with_cold_start(self.cold_start_pending.swap(false, Ordering::SeqCst));

        if let Err(e) = self.storage.add_session(record.clone()) {
            self.current.set(None);
            span.end_with(EndOptions::at(now).with_error_code(SpanErrorCode::Failure));
            return Err(e);
        }

        if let Some(reporter) = &self.crash_reporter {
            reporter.set_current_session(Some(id));
        }

        tracing::info!(
            session_id = %id,
            state = %state,
            cold_start = record.cold_start,
            "Session started"
        );
        *active = Some(ActiveSession { id, span });
        Ok(record)
    }

    /// End the active session through a normal lifecycle transition.
    pub fn end_session(&self) -> Result<Option<SessionRecord>> {
        self.end_session_with(false)
    }

    /// End the active session, marking whether the app is terminating.
    pub fn end_session_with(&self, app_terminated: bool) -> Result<Option<SessionRecord>> {
        let mut active = self.active.lock();
        self.end_locked(&mut active, app_terminated)
    }

    fn end_locked(
        &self,
        active: &mut Option<ActiveSession>,
        app_terminated: bool,
    ) -> Result<Option<SessionRecord>> {
        let Some(session) = active.take() else {
            return Ok(None);
        };

        let now = self.tracer.clock().now();
        session.span.end_at(now);
        self.current.set(None);
        if let Some(reporter) = &self.crash_reporter {
            reporter.set_current_session(None);
        }

        let record = self
            .storage
            .update_session(session.id, |record| record.close(now, app_terminated))?;
        tracing::info!(
            session_id = %session.id,
            app_terminated,
            duration_ms = (now - record.start_time).num_milliseconds(),
            "Session ended"
        );
        Ok(Some(record))
    }

    /// Move the active session to `state`.
    pub fn update_state(&self, state: SessionState) -> Result<Option<SessionRecord>> {
        let Some(id) = self.current_session_id() else {
            return Ok(None);
        };
        let record = self.storage.update_session(id, |record| record.state = state)?;
        tracing::debug!(session_id = %id, state = %state, "Session state changed");
        Ok(Some(record))
    }

    /// Record a heartbeat on the active session.
    pub fn heartbeat(&self) -> Result<Option<SessionRecord>> {
        let Some(id) = self.current_session_id() else {
            return Ok(None);
        };
        let now = self.tracer.clock().now();
        self.storage
            .update_session(id, |record| record.last_heartbeat_time = now)
            .map(Some)
    }
}

/// Outcome of matching a crash report against storage.
#[derive(Debug, Clone, PartialEq)]
pub enum CrashCorrelation {
    /// The session was open and is now closed as crashed.
    Closed(SessionRecord),
    /// The session had already ended; the report id was attached.
    AlreadyEnded(SessionRecord),
    /// No session with the report's id exists.
    NotFound,
}

impl CrashCorrelation {
    /// Whether the report was matched to a session.
    pub fn is_match(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

/// Correlate `report` with the session it names.
///
/// An open session is closed at the crash time (or its last heartbeat when
/// the report has no timestamp) with `clean_exit = false` and
/// `app_terminated = true`.
pub fn correlate_crash(storage: &Storage, report: &CrashReport) -> Result<CrashCorrelation> {
    let Some(session_id) = report.session_id else {
        return Ok(CrashCorrelation::NotFound);
    };
    let Some(session) = storage.fetch_session(session_id) else {
        return Ok(CrashCorrelation::NotFound);
    };

    if !session.is_active() {
        let record = storage.update_session(session_id, |record| {
            record.crash_report_id = Some(report.id.clone());
        })?;
        return Ok(CrashCorrelation::AlreadyEnded(record));
    }

    let timestamp = report.timestamp.unwrap_or(session.last_heartbeat_time);
    let record = storage.update_session(session_id, |record| {
        record.close_with_crash(&report.id, timestamp);
    })?;
    tracing::info!(
        session_id = %session_id,
        report_id = %report.id,
        "Session closed by crash report"
    );
    Ok(CrashCorrelation::Closed(record))
}
