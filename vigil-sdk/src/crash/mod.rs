//! Boundary to the native crash collector.
//!
//! The collector stores raw crash artifacts on its own. The pipeline only
//! asks it for unresolved reports, tells it which session is current so new
//! artifacts get tagged, and tells it to discard reports it has processed.

mod directory;
mod memory;

pub use directory::DirectoryCrashReporter;
pub use memory::MemoryCrashReporter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use vigil_core::{Result, SessionId};

/// Future returned by [`CrashReporter::fetch_unsent_crash_reports`].
pub type CrashReportsFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<CrashReport>>> + Send + 'a>>;

/// An unresolved crash record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashReport {
    /// Collector-assigned identifier.
    pub id: String,
    /// Session active when the crash happened, if the collector knew it.
    pub session_id: Option<SessionId>,
    /// When the crash happened.
    pub timestamp: Option<DateTime<Utc>>,
    /// Raw artifact as produced by the collector.
    pub report: serde_json::Value,
}

impl CrashReport {
    /// Create a report.
    pub fn new(id: impl Into<String>, session_id: Option<SessionId>, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            session_id,
            timestamp,
            report: serde_json::Value::Null,
        }
    }

    /// Attach the raw artifact.
    pub fn with_report(mut self, report: serde_json::Value) -> Self {
        self.report = report;
        self
    }

    /// Serialize as a blob payload.
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A native crash collector.
pub trait CrashReporter: Send + Sync {
    /// All reports not yet discarded.
    fn fetch_unsent_crash_reports(&self) -> CrashReportsFuture<'_>;

    /// Discard a processed report.
    fn delete_crash_report(&self, id: &str) -> Result<()>;

    /// Tag future artifacts with `session_id`.
    fn set_current_session(&self, session_id: Option<SessionId>);
}
