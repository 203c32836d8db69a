//! Reconciliation report types.

use vigil_core::SessionId;
use vigil_upload::DispatchReport;

/// What one reconciliation pass did.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Crash reports matched to a stored session.
    pub matched_crashes: Vec<String>,
    /// Crash reports naming no stored session.
    pub unmatched_crashes: Vec<String>,
    /// Open sessions of dead processes closed at their last heartbeat.
    pub orphaned: Vec<SessionId>,
    /// Sessions moved into the upload cache.
    pub staged: Vec<SessionId>,
    /// Sessions that could not be staged, with the reason.
    pub failed: Vec<(SessionId, String)>,
    /// Result of the final dispatch pass.
    pub dispatch: DispatchReport,
}

impl ReconcileReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a matched crash report.
    pub fn add_matched(&mut self, report_id: impl Into<String>) {
        self.matched_crashes.push(report_id.into());
    }

    /// Record a crash report with no session.
    pub fn add_unmatched(&mut self, report_id: impl Into<String>) {
        self.unmatched_crashes.push(report_id.into());
    }

    /// Record an orphaned session.
    pub fn add_orphaned(&mut self, session_id: SessionId) {
        self.orphaned.push(session_id);
    }

    /// Record a staged session.
    pub fn add_staged(&mut self, session_id: SessionId) {
        self.staged.push(session_id);
    }

    /// Record a session that failed to stage.
    pub fn add_failed(&mut self, session_id: SessionId, reason: impl Into<String>) {
        self.failed.push((session_id, reason.into()));
    }

    /// Whether every ended session reached the cache.
    pub fn all_staged(&self) -> bool {
        self.failed.is_empty()
    }
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ReconcileReport {{ matched: {}, unmatched: {}, orphaned: {}, staged: {}, failed: {}, dispatch: {} }}",
            self.matched_crashes.len(),
            self.unmatched_crashes.len(),
            self.orphaned.len(),
            self.staged.len(),
            self.failed.len(),
            self.dispatch
        )
    }
}
