//! Error types for the upload pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while staging or delivering payloads.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status.
    #[error("Upload rejected (status {status}): {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// Reading or writing a cache entry failed.
    #[error("Upload cache I/O error at {path}: {cause}")]
    CacheIo {
        /// Entry or cache directory path.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },

    /// A cache entry file is damaged.
    #[error("Corrupted upload cache entry {path}: {cause}")]
    CacheCorruption {
        /// Entry path.
        path: PathBuf,
        /// Description of the damage.
        cause: String,
    },

    /// An endpoint URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// An option has an unusable value.
    #[error("Invalid upload option '{field}': {cause}")]
    InvalidOptions {
        /// Option name.
        field: &'static str,
        /// Why the value is unusable.
        cause: String,
    },

    /// Serializing a payload failed.
    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UploadError {
    /// Whether a later attempt could succeed.
    ///
    /// Transport failures and 5xx/408/429 responses are retriable. Cache
    /// corruption and invalid configuration are not.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Http(_) | Self::CacheIo { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::CacheCorruption { .. }
            | Self::InvalidUrl(_)
            | Self::InvalidOptions { .. }
            | Self::Serialization(_) => false,
        }
    }
}

/// Result type for upload operations.
pub type Result<T> = std::result::Result<T, UploadError>;
