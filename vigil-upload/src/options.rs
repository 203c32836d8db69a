//! Upload configuration.

use crate::error::{Result, UploadError};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

/// Where payloads are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOptions {
    /// Receives session payload POSTs.
    pub sessions_url: Url,
    /// Receives crash artifact POSTs.
    pub blobs_url: Url,
}

impl EndpointOptions {
    /// Parse both endpoint URLs.
    pub fn new(sessions_url: &str, blobs_url: &str) -> Result<Self> {
        Ok(Self {
            sessions_url: parse_url(sessions_url)?,
            blobs_url: parse_url(blobs_url)?,
        })
    }
}

/// On-disk cache location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Directory holding one file per staged payload.
    pub directory: PathBuf,
}

impl CacheOptions {
    /// Cache rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

/// Values sent as request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataOptions {
    /// Sent as `X-EM-AID`.
    pub api_key: String,
    /// Sent as `User-Agent`.
    pub user_agent: String,
    /// Sent as `X-EM-DID`. Only hex digits are kept.
    pub device_id: String,
}

impl MetadataOptions {
    /// Build metadata, stripping non-hex characters from `device_id`.
    pub fn new(
        api_key: impl Into<String>,
        user_agent: impl Into<String>,
        device_id: impl AsRef<str>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            user_agent: user_agent.into(),
            device_id: device_id
                .as_ref()
                .chars()
                .filter(char::is_ascii_hexdigit)
                .collect(),
        }
    }
}

/// How hard to try before giving up on a staged payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedundancyOptions {
    /// Extra attempts within one dispatch pass after the first one fails.
    pub automatic_retry_count: u32,
    /// Failed passes an entry survives. An entry whose attempt count
    /// exceeds this is deleted.
    pub max_attempts: u32,
    /// Base delay of the jittered exponential backoff between attempts.
    pub retry_base_delay: Duration,
}

impl Default for RedundancyOptions {
    fn default() -> Self {
        Self {
            automatic_retry_count: 3,
            max_attempts: 10,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

impl RedundancyOptions {
    /// No in-pass retries and no backoff.
    pub fn no_retry() -> Self {
        Self {
            automatic_retry_count: 0,
            retry_base_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Set the in-pass retry count.
    pub fn with_automatic_retry_count(mut self, count: u32) -> Self {
        self.automatic_retry_count = count;
        self
    }

    /// Set the number of failed passes tolerated.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the backoff base delay.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }
}

/// Everything the uploader needs.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Delivery endpoints.
    pub endpoints: EndpointOptions,
    /// Cache location.
    pub cache: CacheOptions,
    /// Request headers.
    pub metadata: MetadataOptions,
    /// Retry policy.
    pub redundancy: RedundancyOptions,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Maximum concurrent requests.
    pub max_concurrent_uploads: usize,
}

impl UploadOptions {
    /// Options with default redundancy, a 30 s timeout and 4 workers.
    pub fn new(endpoints: EndpointOptions, cache: CacheOptions, metadata: MetadataOptions) -> Self {
        Self {
            endpoints,
            cache,
            metadata,
            redundancy: RedundancyOptions::default(),
            request_timeout: Duration::from_secs(30),
            max_concurrent_uploads: 4,
        }
    }

    /// Set the retry policy.
    pub fn with_redundancy(mut self, redundancy: RedundancyOptions) -> Self {
        self.redundancy = redundancy;
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the worker count.
    pub fn with_max_concurrent_uploads(mut self, max: usize) -> Self {
        self.max_concurrent_uploads = max;
        self
    }

    /// Reject unusable values.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_uploads == 0 {
            return Err(UploadError::InvalidOptions {
                field: "max_concurrent_uploads",
                cause: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(UploadError::InvalidOptions {
                field: "request_timeout",
                cause: "must be non-zero".to_string(),
            });
        }
        if self.metadata.api_key.is_empty() {
            return Err(UploadError::InvalidOptions {
                field: "metadata.api_key",
                cause: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| UploadError::InvalidUrl(format!("{}: {}", raw, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UploadError::InvalidUrl(format!(
            "URL must use http or https, got: {}",
            raw
        )));
    }
    Ok(url)
}
