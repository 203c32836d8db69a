//! Error types for vigil.
//!
//! Every error is scoped to the operation that produced it. Nothing in this
//! taxonomy is meant to reach the host application: callers log the error
//! and continue, retry, or defer the work to the next launch.

use crate::types::SessionId;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for vigil operations.
#[derive(Error, Debug)]
pub enum VigilError {
    // =========================================================================
    // Storage Errors (E100-E199)
    // =========================================================================
    /// Failed to create or open the storage log.
    #[error("E101: Failed to open storage at {path}: {cause}")]
    StorageOpen {
        /// The path where opening failed.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },

    /// Appending a record to the storage log failed.
    #[error("E102: Storage write failed: {cause}")]
    StorageWrite {
        /// Reason for the write failure.
        cause: String,
    },

    /// Reading the storage log failed.
    #[error("E103: Storage read failed: {cause}")]
    StorageRead {
        /// Reason for the read failure.
        cause: String,
    },

    /// A corrupted frame was found in the storage log.
    #[error("E104: Storage corruption detected at position {position}: {cause}")]
    StorageCorruption {
        /// Byte position of the corrupted frame.
        position: u64,
        /// Description of the corruption.
        cause: String,
    },

    /// The storage log header does not match the expected schema.
    #[error("E105: Storage schema mismatch at {path}: {cause}")]
    StorageSchema {
        /// The path of the log file.
        path: PathBuf,
        /// Description of the mismatch.
        cause: String,
    },

    /// A uniqueness constraint was violated.
    #[error("E106: Storage constraint violated: {cause}")]
    StorageConstraint {
        /// Description of the violated constraint.
        cause: String,
    },

    /// The storage log is locked by another process.
    #[error("E107: Storage at {path} is locked by another process")]
    StorageLocked {
        /// The path of the locked log file.
        path: PathBuf,
    },

    // =========================================================================
    // Identifier Errors (E200-E299)
    // =========================================================================
    /// An identifier could not be parsed.
    #[error("E201: Invalid {kind} identifier '{value}'")]
    InvalidIdentifier {
        /// The kind of identifier (session, trace, span, ...).
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    // =========================================================================
    // Setup Errors (E400-E499)
    // =========================================================================
    /// Pipeline setup failed. The pipeline does not start.
    #[error("E401: Failed to set up {component}: {cause}")]
    Setup {
        /// The component that failed to initialize.
        component: &'static str,
        /// Reason for the failure.
        cause: String,
    },

    // =========================================================================
    // Reconciliation Errors (E500-E599)
    // =========================================================================
    /// Fetching unresolved crash reports failed.
    #[error("E501: Failed to fetch crash reports: {cause}")]
    CrashReportFetch {
        /// Reason for the failure.
        cause: String,
    },

    /// Discarding a processed crash report failed.
    #[error("E502: Failed to delete crash report '{report_id}': {cause}")]
    CrashReportDelete {
        /// The crash report identifier.
        report_id: String,
        /// Reason for the failure.
        cause: String,
    },

    /// Staging a session for upload failed.
    #[error("E503: Failed to stage session {session_id}: {cause}")]
    Staging {
        /// The session being staged.
        session_id: SessionId,
        /// Reason for the failure.
        cause: String,
    },

    // =========================================================================
    // Session Errors (E600-E699)
    // =========================================================================
    /// Session not found in storage.
    #[error("E601: Session {session_id} not found")]
    SessionNotFound {
        /// The session identifier that was not found.
        session_id: SessionId,
    },

    // =========================================================================
    // Configuration Errors (E800-E899)
    // =========================================================================
    /// Invalid configuration value.
    #[error("E801: Invalid configuration '{field}': {cause}")]
    ConfigValue {
        /// The configuration field with invalid value.
        field: String,
        /// Description of why the value is invalid.
        cause: String,
    },

    /// Serialization/deserialization error.
    #[error("E802: Serialization error: {0}")]
    Serialization(
        /// The serialization error message.
        String,
    ),

    // =========================================================================
    // I/O Errors (E900-E999)
    // =========================================================================
    /// File I/O error.
    #[error("E901: I/O error at {path}: {cause}")]
    Io {
        /// The path where the I/O error occurred.
        path: PathBuf,
        /// Description of the I/O error.
        cause: String,
    },
}

impl VigilError {
    /// Get the error code (e.g., "E101").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::StorageOpen { .. } => "E101",
            Self::StorageWrite { .. } => "E102",
            Self::StorageRead { .. } => "E103",
            Self::StorageCorruption { .. } => "E104",
            Self::StorageSchema { .. } => "E105",
            Self::StorageConstraint { .. } => "E106",
            Self::StorageLocked { .. } => "E107",
            Self::InvalidIdentifier { .. } => "E201",
            Self::Setup { .. } => "E401",
            Self::CrashReportFetch { .. } => "E501",
            Self::CrashReportDelete { .. } => "E502",
            Self::Staging { .. } => "E503",
            Self::SessionNotFound { .. } => "E601",
            Self::ConfigValue { .. } => "E801",
            Self::Serialization(_) => "E802",
            Self::Io { .. } => "E901",
        }
    }

    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::StorageWrite { .. }
                | Self::StorageLocked { .. }
                | Self::CrashReportFetch { .. }
                | Self::CrashReportDelete { .. }
                | Self::Io { .. }
        )
    }

    /// Check if this error originated in the storage engine.
    #[must_use]
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Self::StorageOpen { .. }
                | Self::StorageWrite { .. }
                | Self::StorageRead { .. }
                | Self::StorageCorruption { .. }
                | Self::StorageSchema { .. }
                | Self::StorageConstraint { .. }
                | Self::StorageLocked { .. }
        )
    }

    /// Check if this error only affects pipeline setup.
    #[must_use]
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::Setup { .. } | Self::StorageOpen { .. } | Self::StorageSchema { .. }
        )
    }
}

/// Result type alias using `VigilError`.
pub type Result<T> = std::result::Result<T, VigilError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    /// Convert any displayable error into a setup error for `component`.
    fn setup_context(self, component: &'static str) -> Result<T>;

    /// Convert any displayable error into a staging error for `session_id`.
    fn staging_context(self, session_id: SessionId) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn setup_context(self, component: &'static str) -> Result<T> {
        self.map_err(|e| VigilError::Setup {
            component,
            cause: e.to_string(),
        })
    }

    fn staging_context(self, session_id: SessionId) -> Result<T> {
        self.map_err(|e| VigilError::Staging {
            session_id,
            cause: e.to_string(),
        })
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
