//! Cache entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a staged payload. Also the backend idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadEntryId(Uuid);

impl UploadEntryId {
    /// Create a new random entry ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an entry ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for UploadEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

/// Which endpoint a payload goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PayloadType {
    /// Session payload, posted to the sessions URL.
    Session = 1,
    /// Crash artifact, posted to the blobs URL.
    Blob = 2,
}

impl PayloadType {
    /// On-disk tag.
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Parse an on-disk tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Session),
            2 => Some(Self::Blob),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => f.write_str("session"),
            Self::Blob => f.write_str("blob"),
        }
    }
}

/// A staged, not yet acknowledged payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Entry identifier.
    pub id: UploadEntryId,
    /// Target endpoint.
    pub payload_type: PayloadType,
    /// Serialized payload.
    pub data: Vec<u8>,
    /// Failed dispatch passes so far.
    pub attempt_count: u32,
    /// When the payload was staged.
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// A fresh entry with no attempts.
    pub fn new(payload_type: PayloadType, data: Vec<u8>) -> Self {
        Self {
            id: UploadEntryId::new(),
            payload_type,
            data,
            attempt_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// Summary of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Entries acknowledged and removed.
    pub delivered: usize,
    /// Entries that failed and stay cached.
    pub failed: usize,
    /// Entries deleted by the redundancy policy.
    pub abandoned: usize,
    /// Entries skipped because another pass is sending them.
    pub skipped: usize,
}

impl DispatchReport {
    /// Entries this pass attempted.
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed + self.abandoned
    }
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "delivered={} failed={} abandoned={} skipped={}",
            self.delivered, self.failed, self.abandoned, self.skipped
        )
    }
}
