//! Crash reporter backed by a directory of JSON reports.

use super::{CrashReport, CrashReporter, CrashReportsFuture};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use vigil_core::{Result, SessionId, VigilError};

const REPORT_EXTENSION: &str = "json";
const CURRENT_SESSION_FILE: &str = "current_session";

/// Reads reports that a native collector drops into a directory.
///
/// Each `<id>.json` file is one report. Its `session_id` field (a session
/// UUID) and `timestamp` field (RFC 3339 string or unix milliseconds) are
/// extracted; the whole document is kept as the raw artifact. The current
/// session id is written to a `current_session` file for the collector to
/// pick up.
#[derive(Debug, Clone)]
pub struct DirectoryCrashReporter {
    directory: PathBuf,
}

impl DirectoryCrashReporter {
    /// Reporter over `directory`. The directory need not exist yet.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Reports directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn scan(&self) -> Result<Vec<CrashReport>> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(VigilError::CrashReportFetch {
                    cause: format!("{}: {}", self.directory.display(), e),
                });
            }
        };

        let mut reports = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(REPORT_EXTENSION) {
                continue;
            }
            match read_report(&path) {
                Ok(report) => reports.push(report),
                Err(cause) => {
                    tracing::warn!(path = %path.display(), %cause, "Skipping unreadable crash report");
                }
            }
        }
        reports.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(reports)
    }

    fn report_path(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", id, REPORT_EXTENSION))
    }
}

impl CrashReporter for DirectoryCrashReporter {
    fn fetch_unsent_crash_reports(&self) -> CrashReportsFuture<'_> {
        Box::pin(async move { self.scan() })
    }

    fn delete_crash_report(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.report_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VigilError::CrashReportDelete {
                report_id: id.to_string(),
                cause: e.to_string(),
            }),
        }
    }

    fn set_current_session(&self, session_id: Option<SessionId>) {
        let path = self.directory.join(CURRENT_SESSION_FILE);
        let result = match session_id {
            Some(id) => fs::create_dir_all(&self.directory).and_then(|()| {
                let tmp = path.with_extension("tmp");
                fs::write(&tmp, id.to_string())?;
                fs::rename(&tmp, &path)
            }),
            None => match fs::remove_file(&path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "Failed to record current session for crash collector");
        }
    }
}

fn read_report(path: &Path) -> std::result::Result<CrashReport, String> {
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| "file name is not valid UTF-8".to_string())?
        .to_string();
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    let document: Value = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;

    let session_id = document
        .get("session_id")
        .and_then(Value::as_str)
        .and_then(|raw| SessionId::parse(raw).ok());
    let timestamp = document.get("timestamp").and_then(parse_timestamp);

    Ok(CrashReport {
        id,
        session_id,
        timestamp,
        report: document,
    })
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
