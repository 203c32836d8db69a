//! Hands ended sessions over to the upload cache.

use crate::crash::CrashReport;
use crate::payload::SessionPayloadBuilder;
use vigil_core::{Result, ResultExt, SessionId, SessionRecord, Storage, VigilError};
use vigil_upload::{CacheEntry, PayloadType, Uploader};

/// Cache entries created for one session.
#[derive(Debug, Clone)]
pub struct StagedSession {
    /// The staged session.
    pub session_id: SessionId,
    /// Session payload entry.
    pub session_entry: CacheEntry,
    /// Crash artifact entry, if the session crashed.
    pub crash_entry: Option<CacheEntry>,
}

/// Moves ended sessions from storage into the upload cache.
///
/// Once a payload is staged the session's rows are deleted right away.
/// From then on the cache alone owns the undelivered data, so storage does
/// not grow while the network is down.
#[derive(Clone)]
pub struct SessionDelivery {
    storage: Storage,
    uploader: Uploader,
}

impl SessionDelivery {
    /// Delivery from `storage` through `uploader`.
    pub fn new(storage: Storage, uploader: Uploader) -> Self {
        Self { storage, uploader }
    }

    /// The uploader entries are staged in.
    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// Stage `session` and, if given, its crash artifact, then delete the
    /// session's rows.
    ///
    /// Either every entry reaches the cache or none does; on failure the
    /// session stays in storage untouched.
    pub fn stage(&self, session: &SessionRecord, crash: Option<&CrashReport>) -> Result<StagedSession> {
        let payload = SessionPayloadBuilder::build(&self.storage, session)?;

        let mut payloads = vec![(
            PayloadType::Session,
            serde_json::to_vec(&payload).map_err(VigilError::from),
        )];
        if let Some(report) = crash {
            payloads.push((PayloadType::Blob, report.to_blob()));
        }

        let mut entries = self.enqueue_all(session.id, payloads)?.into_iter();
        let Some(session_entry) = entries.next() else {
            return Err(VigilError::Staging {
                session_id: session.id,
                cause: "no entry staged".to_string(),
            });
        };
        let crash_entry = entries.next();

        if let Err(e) = self.storage.delete_session(session.id) {
            tracing::warn!(
                session_id = %session.id,
                error = %e,
                "Session staged but its rows could not be deleted"
            );
        }

        tracing::info!(
            session_id = %session.id,
            entry_id = %session_entry.id,
            with_crash = crash_entry.is_some(),
            "Session staged for upload"
        );
        Ok(StagedSession {
            session_id: session.id,
            session_entry,
            crash_entry,
        })
    }

    /// Enqueue `payloads` in order. The first failure withdraws the entries
    /// already written.
    fn enqueue_all(
        &self,
        session_id: SessionId,
        payloads: Vec<(PayloadType, Result<Vec<u8>>)>,
    ) -> Result<Vec<CacheEntry>> {
        let mut staged: Vec<CacheEntry> = Vec::with_capacity(payloads.len());
        for (payload_type, data) in payloads {
            let entry = data.and_then(|data| {
                self.uploader
                    .enqueue(payload_type, data)
                    .staging_context(session_id)
            });
            match entry {
                Ok(entry) => staged.push(entry),
                Err(e) => {
                    self.withdraw(session_id, &staged);
                    return Err(e);
                }
            }
        }
        Ok(staged)
    }

    fn withdraw(&self, session_id: SessionId, entries: &[CacheEntry]) {
        for entry in entries {
            if let Err(e) = self.uploader.cache().delete(entry.id) {
                tracing::warn!(
                    session_id = %session_id,
                    entry_id = %entry.id,
                    error = %e,
                    "Failed to withdraw a partially staged entry"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vigil_core::{ProcessId, StorageConfig};
    use vigil_upload::{CacheOptions, EndpointOptions, MetadataOptions, UploadOptions};

    fn delivery(dir: &std::path::Path) -> (Storage, SessionDelivery) {
        let storage = Storage::open(
            StorageConfig::default()
                .with_directory(dir.join("storage"))
                .with_sync(false),
        )
        .unwrap();
        let endpoints = EndpointOptions::new(
            "http://127.0.0.1:9/v1/log/sessions",
            "http://127.0.0.1:9/v1/log/blobs",
        )
        .unwrap();
        let options = UploadOptions::new(
            endpoints,
            CacheOptions::new(dir.join("uploads")),
            MetadataOptions::new("a1b2c", "vigil-tests/1.0", "0123ABCD"),
        );
        let uploader = Uploader::new(options).unwrap();
        (storage.clone(), SessionDelivery::new(storage, uploader))
    }

    #[test]
    fn later_failure_withdraws_earlier_entries() {
        let dir = tempdir().unwrap();
        let (_, delivery) = delivery(dir.path());

        let result = delivery.enqueue_all(
            SessionId::new(),
            vec![
                (PayloadType::Session, Ok(b"{}".to_vec())),
                (
                    PayloadType::Blob,
                    Err(VigilError::Serialization("unencodable report".to_string())),
                ),
            ],
        );

        assert_eq!(result.unwrap_err().code(), "E802");
        assert!(delivery.uploader().cache().is_empty());
    }

    #[test]
    fn staged_session_leaves_storage() {
        let dir = tempdir().unwrap();
        let (storage, delivery) = delivery(dir.path());
        let mut session = SessionRecord::new(SessionId::new(), ProcessId::current(), chrono::Utc::now());
        session.end_time = Some(session.start_time);
        storage.add_session(session.clone()).unwrap();

        let staged = delivery.stage(&session, None).unwrap();
        assert!(staged.crash_entry.is_none());
        assert_eq!(delivery.uploader().cache().len(), 1);
        assert!(storage.fetch_session(session.id).is_none());
    }
}
