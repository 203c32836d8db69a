//! Startup recovery of unsent data.
//!
//! Runs once per launch, before the new session starts recording:
//!
//! 1. fetch unresolved crash reports from the collector
//! 2. close the sessions they name
//! 3. close open sessions left behind by dead processes
//! 4. stage every ended session (plus its crash artifact) and delete its rows
//! 5. discard the matched crash reports whose sessions reached the cache
//! 6. dispatch the upload cache

mod report;

pub use report::ReconcileReport;

use crate::crash::{CrashReport, CrashReporter};
use crate::delivery::SessionDelivery;
use crate::session::{CrashCorrelation, correlate_crash};
use std::collections::HashMap;
use std::sync::Arc;
use vigil_core::{ProcessId, Result, SessionId, SessionRecord, Storage, VigilError};
use vigil_upload::Uploader;

/// Recovers data orphaned by crashes and unclean exits.
pub struct UnsentDataReconciler {
    storage: Storage,
    delivery: SessionDelivery,
    crash_reporter: Option<Arc<dyn CrashReporter>>,
}

impl UnsentDataReconciler {
    /// Reconciler over `storage` delivering through `uploader`.
    pub fn new(storage: Storage, uploader: Uploader) -> Self {
        Self {
            delivery: SessionDelivery::new(storage.clone(), uploader),
            storage,
            crash_reporter: None,
        }
    }

    /// Correlate sessions with reports from `reporter`.
    pub fn with_crash_reporter(mut self, reporter: Arc<dyn CrashReporter>) -> Self {
        self.crash_reporter = Some(reporter);
        self
    }

    /// Run one reconciliation pass.
    ///
    /// If the crash collector cannot be read, nothing is touched and the
    /// error is returned; the reports stay for the next launch.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let crash_reports = match &self.crash_reporter {
            Some(reporter) => reporter
                .fetch_unsent_crash_reports()
                .await
                .map_err(|e| match e {
                    VigilError::CrashReportFetch { .. } => e,
                    other => VigilError::CrashReportFetch {
                        cause: other.to_string(),
                    },
                })?,
            None => Vec::new(),
        };

        let mut report = ReconcileReport::new();
        let matched = self.correlate(crash_reports, &mut report);
        self.close_orphans(&matched, &mut report);
        self.stage_ended(&matched, &mut report);
        self.discard_matched(&matched, &report.staged);

        report.dispatch = self.delivery.uploader().dispatch().await;
        tracing::info!(%report, "Unsent data reconciled");
        Ok(report)
    }

    fn correlate(
        &self,
        crash_reports: Vec<CrashReport>,
        report: &mut ReconcileReport,
    ) -> HashMap<SessionId, CrashReport> {
        let mut matched = HashMap::new();
        for crash in crash_reports {
            match correlate_crash(&self.storage, &crash) {
                Ok(CrashCorrelation::NotFound) => {
                    tracing::info!(
                        report_id = %crash.id,
                        session_id = ?crash.session_id,
                        "Crash report names no stored session, discarding"
                    );
                    report.add_unmatched(crash.id.clone());
                    if let Some(reporter) = &self.crash_reporter {
                        if let Err(e) = reporter.delete_crash_report(&crash.id) {
                            tracing::warn!(report_id = %crash.id, error = %e, "Failed to discard crash report");
                        }
                    }
                }
                Ok(CrashCorrelation::Closed(session) | CrashCorrelation::AlreadyEnded(session)) => {
                    report.add_matched(crash.id.clone());
                    matched.insert(session.id, crash);
                }
                Err(e) => {
                    tracing::warn!(
                        report_id = %crash.id,
                        error = %e,
                        "Failed to correlate crash report, leaving it for the next launch"
                    );
                }
            }
        }
        matched
    }

    fn close_orphans(&self, matched: &HashMap<SessionId, CrashReport>, report: &mut ReconcileReport) {
        let current = ProcessId::current();
        let orphans = self
            .storage
            .fetch_all_sessions()
            .into_iter()
            .filter(|s| s.is_active() && s.process_id != current && !matched.contains_key(&s.id));

        for orphan in orphans {
            let closed = self.storage.update_session(orphan.id, |record| {
                record.end_time = Some(record.last_heartbeat_time);
                record.clean_exit = false;
                record.app_terminated = true;
            });
            match closed {
                Ok(_) => {
                    tracing::info!(session_id = %orphan.id, "Closed session left open by a previous process");
                    report.add_orphaned(orphan.id);
                }
                Err(e) => {
                    tracing::warn!(session_id = %orphan.id, error = %e, "Failed to close orphaned session");
                }
            }
        }
    }

    fn stage_ended(&self, matched: &HashMap<SessionId, CrashReport>, report: &mut ReconcileReport) {
        let ended: Vec<SessionRecord> = self
            .storage
            .fetch_all_sessions()
            .into_iter()
            .filter(|s| !s.is_active())
            .collect();

        for session in ended {
            match self.delivery.stage(&session, matched.get(&session.id)) {
                Ok(_) => report.add_staged(session.id),
                Err(e) => {
                    tracing::warn!(session_id = %session.id, error = %e, "Failed to stage session");
                    report.add_failed(session.id, e.to_string());
                }
            }
        }
    }

    /// A report whose session failed to stage stays in the collector so the
    /// next launch stages its artifact with the session.
    fn discard_matched(&self, matched: &HashMap<SessionId, CrashReport>, staged: &[SessionId]) {
        let Some(reporter) = &self.crash_reporter else {
            return;
        };
        let delivered = matched
            .iter()
            .filter(|(session_id, _)| staged.contains(session_id))
            .map(|(_, crash)| crash);
        for crash in delivered {
            if let Err(e) = reporter.delete_crash_report(&crash.id) {
                tracing::warn!(report_id = %crash.id, error = %e, "Failed to discard crash report");
            }
        }
    }
}
