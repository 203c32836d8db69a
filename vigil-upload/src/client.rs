//! HTTP client for the sessions and blobs endpoints.

use crate::error::{Result, UploadError};
use crate::options::MetadataOptions;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client as HttpClient, Url};
use std::time::Duration;

/// Header carrying the API key (`X-EM-AID`).
pub const API_KEY_HEADER: &str = "x-em-aid";
/// Header carrying the device identifier (`X-EM-DID`).
pub const DEVICE_ID_HEADER: &str = "x-em-did";

/// Thin wrapper over `reqwest` that attaches the pipeline headers.
#[derive(Debug, Clone)]
pub struct UploadClient {
    http: HttpClient,
}

impl UploadClient {
    /// Build a client sending `metadata` headers with every request.
    pub fn new(metadata: &MetadataOptions, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static(API_KEY_HEADER),
            header_value("api_key", &metadata.api_key)?,
        );
        headers.insert(
            HeaderName::from_static(DEVICE_ID_HEADER),
            header_value("device_id", &metadata.device_id)?,
        );
        headers.insert(USER_AGENT, header_value("user_agent", &metadata.user_agent)?);

        let http = HttpClient::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { http })
    }

    /// POST `body` to `url`. Any non-2xx status is an error.
    pub async fn post(&self, url: &Url, body: Vec<u8>) -> Result<()> {
        let response = self.http.post(url.clone()).body(body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response
            .text()
            .await
            .ok()
            .filter(|body| !body.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string());

        Err(UploadError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

fn header_value(field: &'static str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| UploadError::InvalidOptions {
        field,
        cause: e.to_string(),
    })
}
