//! Pipeline configuration.

use chrono::{DateTime, Utc};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vigil_core::{Result, StorageConfig, VigilError};
use vigil_upload::{CacheOptions, EndpointOptions, MetadataOptions, RedundancyOptions, UploadOptions};

const SESSIONS_PATH: &str = "/v1/log/sessions";
const BLOBS_PATH: &str = "/v1/log/blobs";

/// Configuration for a [`Vigil`](crate::Vigil) pipeline.
#[derive(Debug, Clone)]
pub struct VigilOptions {
    /// Application identifier. Also sent as the API key.
    pub app_id: String,
    /// Production collector base URL.
    pub base_url: String,
    /// Development collector base URL.
    pub development_base_url: String,
    /// Send session payloads to the development base URL.
    pub use_development_endpoints: bool,
    /// Root directory for storage, upload cache and device id.
    pub data_directory: PathBuf,
    /// Interval between session heartbeats.
    pub heartbeat_interval: Duration,
    /// Retry policy for uploads.
    pub redundancy: RedundancyOptions,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Maximum concurrent uploads.
    pub max_concurrent_uploads: usize,
    /// `User-Agent` sent with uploads.
    pub user_agent: String,
    /// Fsync the storage log on every commit.
    pub sync_storage: bool,
    /// When the host process started, if known.
    pub process_start_time: Option<DateTime<Utc>>,
}

impl VigilOptions {
    /// Options with defaults for everything but identity and location.
    pub fn new(
        app_id: impl Into<String>,
        base_url: impl Into<String>,
        data_directory: impl Into<PathBuf>,
    ) -> Self {
        let base_url = trim_base(base_url.into());
        Self {
            app_id: app_id.into(),
            development_base_url: base_url.clone(),
            base_url,
            use_development_endpoints: false,
            data_directory: data_directory.into(),
            heartbeat_interval: Duration::from_secs(5),
            redundancy: RedundancyOptions::default(),
            request_timeout: Duration::from_secs(30),
            max_concurrent_uploads: 4,
            user_agent: format!("vigil-sdk/{}", env!("CARGO_PKG_VERSION")),
            sync_storage: true,
            process_start_time: None,
        }
    }

    /// Read options from the environment.
    ///
    /// - `VIGIL_APP_ID` (required)
    /// - `VIGIL_BASE_URL` (required)
    /// - `VIGIL_DEV_BASE_URL`: development base URL
    /// - `VIGIL_USE_DEV_ENDPOINTS`: `true`/`1` to use it
    /// - `VIGIL_DATA_DIR`: defaults to `./vigil-data`
    pub fn from_env() -> Result<Self> {
        let app_id = required_env("VIGIL_APP_ID")?;
        let base_url = required_env("VIGIL_BASE_URL")?;
        let data_directory = env::var("VIGIL_DATA_DIR").unwrap_or_else(|_| "vigil-data".to_string());

        let mut options = Self::new(app_id, base_url, data_directory);
        if let Ok(dev) = env::var("VIGIL_DEV_BASE_URL") {
            options = options.with_development_base_url(dev);
        }
        if let Ok(flag) = env::var("VIGIL_USE_DEV_ENDPOINTS") {
            options.use_development_endpoints = flag.eq_ignore_ascii_case("true") || flag == "1";
        }
        options.validate()?;
        Ok(options)
    }

    /// Set the development base URL.
    pub fn with_development_base_url(mut self, url: impl Into<String>) -> Self {
        self.development_base_url = trim_base(url.into());
        self
    }

    /// Route session payloads to the development base URL.
    pub fn with_development_endpoints(mut self, enabled: bool) -> Self {
        self.use_development_endpoints = enabled;
        self
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the upload retry policy.
    pub fn with_redundancy(mut self, redundancy: RedundancyOptions) -> Self {
        self.redundancy = redundancy;
        self
    }

    /// Set the upload request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the upload worker count.
    pub fn with_max_concurrent_uploads(mut self, max: usize) -> Self {
        self.max_concurrent_uploads = max;
        self
    }

    /// Set the `User-Agent`.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Enable or disable fsync on storage commits.
    pub fn with_sync_storage(mut self, sync: bool) -> Self {
        self.sync_storage = sync;
        self
    }

    /// Record when the host process started.
    pub fn with_process_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.process_start_time = Some(start);
        self
    }

    /// Sessions endpoint. Uses the development base when enabled.
    pub fn sessions_url(&self) -> String {
        let base = if self.use_development_endpoints {
            &self.development_base_url
        } else {
            &self.base_url
        };
        format!("{}{}", base, SESSIONS_PATH)
    }

    /// Blobs endpoint. Always production.
    pub fn blobs_url(&self) -> String {
        format!("{}{}", self.base_url, BLOBS_PATH)
    }

    /// Storage engine configuration under the data directory.
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::default()
            .with_directory(self.data_directory.join("storage"))
            .with_sync(self.sync_storage)
    }

    /// Upload cache directory.
    pub fn cache_directory(&self) -> PathBuf {
        self.data_directory.join("uploads")
    }

    /// Default location of the persisted device identifier.
    pub fn device_id_path(&self) -> PathBuf {
        self.data_directory.join("device_id")
    }

    /// Data directory.
    pub fn data_directory(&self) -> &Path {
        &self.data_directory
    }

    /// Upload configuration for `device_id`.
    pub fn upload_options(&self, device_id: &str) -> vigil_upload::Result<UploadOptions> {
        let endpoints = EndpointOptions::new(&self.sessions_url(), &self.blobs_url())?;
        let options = UploadOptions::new(
            endpoints,
            CacheOptions::new(self.cache_directory()),
            MetadataOptions::new(self.app_id.clone(), self.user_agent.clone(), device_id),
        )
        .with_redundancy(self.redundancy)
        .with_request_timeout(self.request_timeout)
        .with_max_concurrent_uploads(self.max_concurrent_uploads);
        options.validate()?;
        Ok(options)
    }

    /// Reject unusable values.
    pub fn validate(&self) -> Result<()> {
        if self.app_id.trim().is_empty() {
            return Err(config_error("app_id", "must not be empty"));
        }
        if !self.app_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(config_error("app_id", "must be alphanumeric"));
        }
        for (field, url) in [
            ("base_url", &self.base_url),
            ("development_base_url", &self.development_base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(config_error(field, "must be an http or https URL"));
            }
        }
        if self.heartbeat_interval.is_zero() {
            return Err(config_error("heartbeat_interval", "must be non-zero"));
        }
        Ok(())
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn required_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| config_error(name, "environment variable is not set"))
}

fn config_error(field: &str, cause: &str) -> VigilError {
    VigilError::ConfigValue {
        field: field.to_string(),
        cause: cause.to_string(),
    }
}
