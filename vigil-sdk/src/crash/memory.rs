//! In-process crash reporter.

use super::{CrashReport, CrashReporter, CrashReportsFuture};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use vigil_core::{Result, SessionId};

/// Crash reporter that keeps reports in memory.
///
/// Hosts without a native collector can feed it reports themselves; tests
/// use it to stage crash scenarios.
#[derive(Debug, Default)]
pub struct MemoryCrashReporter {
    reports: RwLock<BTreeMap<String, CrashReport>>,
    current_session: RwLock<Option<SessionId>>,
}

impl MemoryCrashReporter {
    /// Create an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a report, replacing one with the same id.
    pub fn add(&self, report: CrashReport) {
        self.reports.write().insert(report.id.clone(), report);
    }

    /// Number of reports not yet discarded.
    pub fn len(&self) -> usize {
        self.reports.read().len()
    }

    /// Whether every report has been discarded.
    pub fn is_empty(&self) -> bool {
        self.reports.read().is_empty()
    }

    /// The session new crashes would be tagged with.
    pub fn current_session(&self) -> Option<SessionId> {
        *self.current_session.read()
    }
}

impl CrashReporter for MemoryCrashReporter {
    fn fetch_unsent_crash_reports(&self) -> CrashReportsFuture<'_> {
        let reports: Vec<CrashReport> = self.reports.read().values().cloned().collect();
        Box::pin(async move { Ok(reports) })
    }

    fn delete_crash_report(&self, id: &str) -> Result<()> {
        if self.reports.write().remove(id).is_none() {
            tracing::debug!(report_id = %id, "Crash report already discarded");
        }
        Ok(())
    }

    fn set_current_session(&self, session_id: Option<SessionId>) {
        *self.current_session.write() = session_id;
    }
}
