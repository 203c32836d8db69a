//! Span data model.

use crate::types::{SpanId, TraceId};
use crate::value::{AttributeValue, Attributes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute keys written by the span core.
pub mod attribute_keys {
    /// Semantic span type.
    pub const TYPE: &str = "emb.type";
    /// Span error code (`failure`, `user_abandon`, `unknown`).
    pub const ERROR_CODE: &str = "emb.error_code";
    /// Error message recorded on end.
    pub const ERROR_MESSAGE: &str = "error.message";
    /// Numeric error code recorded on end.
    pub const ERROR_NUMERIC_CODE: &str = "error.code";
    /// Error type or domain recorded on end.
    pub const ERROR_TYPE: &str = "error.type";
}

/// Semantic type of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpanType {
    /// Generic performance span.
    #[serde(rename = "perf")]
    Performance,
    /// User experience span.
    #[serde(rename = "ux")]
    Ux,
    /// System span.
    #[serde(rename = "system")]
    System,
    /// Root span of a session.
    #[serde(rename = "ux.session")]
    Session,
    /// HTTP request captured by network capture.
    #[serde(rename = "perf.network_http_request")]
    NetworkHttp,
}

impl SpanType {
    /// Attribute value for `emb.type`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Performance => "perf",
            Self::Ux => "ux",
            Self::System => "system",
            Self::Session => "ux.session",
            Self::NetworkHttp => "perf.network_http_request",
        }
    }
}

impl fmt::Display for SpanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion status of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    /// Not yet decided.
    #[default]
    Unset,
    /// Completed successfully.
    Ok,
    /// Completed with an error.
    Error,
}

/// Reason a span ended unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanErrorCode {
    /// The operation failed.
    Failure,
    /// The user abandoned the operation.
    UserAbandon,
    /// The outcome is unknown (e.g. the process died).
    Unknown,
}

impl SpanErrorCode {
    /// Attribute value for `emb.error_code`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Failure => "failure",
            Self::UserAbandon => "user_abandon",
            Self::Unknown => "unknown",
        }
    }
}

/// Error details recorded when a span ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanError {
    /// Error type or domain.
    pub error_type: String,
    /// Numeric code.
    pub code: i64,
    /// Human readable message.
    pub message: String,
}

impl SpanError {
    /// Create error details.
    pub fn new(error_type: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            code,
            message: message.into(),
        }
    }

    /// Describe any `std::error::Error`.
    pub fn from_error<E: std::error::Error>(err: &E, code: i64) -> Self {
        Self::new(std::any::type_name::<E>(), code, err.to_string())
    }
}

/// Arguments to [`RecordingSpan::end_with`](super::RecordingSpan::end_with).
#[derive(Debug, Clone, Default)]
pub struct EndOptions {
    /// End time. Defaults to the tracer clock's now.
    pub time: Option<DateTime<Utc>>,
    /// Error that ended the span.
    pub error: Option<SpanError>,
    /// Explicit error code.
    pub error_code: Option<SpanErrorCode>,
}

impl EndOptions {
    /// End at an explicit time.
    #[must_use]
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            time: Some(time),
            ..Self::default()
        }
    }

    /// Attach an error.
    #[must_use]
    pub fn with_error(mut self, error: SpanError) -> Self {
        self.error = Some(error);
        self
    }

    /// Attach an explicit error code.
    #[must_use]
    pub fn with_error_code(mut self, code: SpanErrorCode) -> Self {
        self.error_code = Some(code);
        self
    }
}

/// A timestamped event inside a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    /// Event name.
    pub name: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Event attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

impl SpanEvent {
    /// Create an event.
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>, attributes: Attributes) -> Self {
        Self {
            name: name.into(),
            timestamp,
            attributes,
        }
    }
}

/// Snapshot of a span's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanData {
    /// Trace the span belongs to.
    pub trace_id: TraceId,
    /// Span identifier.
    pub span_id: SpanId,
    /// Parent span, if any.
    pub parent_span_id: Option<SpanId>,
    /// Span name.
    pub name: String,
    /// Semantic type.
    pub span_type: SpanType,
    /// Start time.
    pub start_time: DateTime<Utc>,
    /// End time. Absent while recording.
    pub end_time: Option<DateTime<Utc>>,
    /// Status.
    pub status: SpanStatus,
    /// Attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// Events in call order.
    #[serde(default)]
    pub events: Vec<SpanEvent>,
}

impl SpanData {
    /// A span is recording while it has no end time.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.end_time.is_none()
    }

    /// Apply end semantics.
    ///
    /// An error or error code forces `Error`. Otherwise an `Unset` status
    /// becomes `Ok` and an existing `Error` is kept.
    pub(crate) fn apply_end(&mut self, time: DateTime<Utc>, options: EndOptions) {
        self.end_time = Some(time);

        if let Some(error) = &options.error {
            self.attributes.insert(
                attribute_keys::ERROR_MESSAGE.to_string(),
                AttributeValue::String(error.message.clone()),
            );
            self.attributes.insert(
                attribute_keys::ERROR_NUMERIC_CODE.to_string(),
                AttributeValue::Int(error.code),
            );
            self.attributes.insert(
                attribute_keys::ERROR_TYPE.to_string(),
                AttributeValue::String(error.error_type.clone()),
            );
        }

        let code = match (options.error_code, &options.error) {
            (Some(code), _) => Some(code),
            (None, Some(_)) => Some(SpanErrorCode::Failure),
            (None, None) => None,
        };

        match code {
            Some(code) => {
                self.attributes.insert(
                    attribute_keys::ERROR_CODE.to_string(),
                    AttributeValue::String(code.as_str().to_string()),
                );
                self.status = SpanStatus::Error;
            }
            None if self.status == SpanStatus::Unset => self.status = SpanStatus::Ok,
            None => {}
        }
    }
}
