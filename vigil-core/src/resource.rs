//! Key/value resources and their lifetimes.

use crate::types::{ProcessId, SessionId};
use crate::value::AttributeValue;
use serde::{Deserialize, Serialize};

/// Well-known resource keys.
pub mod keys {
    /// Per-device payload counter.
    pub const SESSION_UPLOAD_INDEX: &str = "emb.session.upload_index";
    /// Prefix of app info keys.
    pub const APP_PREFIX: &str = "emb.app.";
    /// Prefix of device info keys.
    pub const DEVICE_PREFIX: &str = "emb.device.";
    /// Prefix of user info keys.
    pub const USER_PREFIX: &str = "emb.user.";
}

/// Lifetime of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "owner", rename_all = "snake_case")]
pub enum ResourceScope {
    /// Survives sessions and process restarts.
    Permanent,
    /// Discarded with its session's data.
    Session(SessionId),
    /// Lives as long as the process has data in storage.
    Process(ProcessId),
}

/// A persisted resource row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Key, unique within its scope.
    pub key: String,
    /// Stored value.
    pub value: AttributeValue,
    /// Lifetime of the resource.
    pub scope: ResourceScope,
}

impl ResourceRecord {
    /// Create a resource row.
    pub fn new(key: impl Into<String>, value: impl Into<AttributeValue>, scope: ResourceScope) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            scope,
        }
    }

    /// Create a permanent resource row.
    pub fn permanent(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::new(key, value, ResourceScope::Permanent)
    }
}
