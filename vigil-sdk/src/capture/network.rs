//! HTTP request capture.

use super::{CaptureSource, CaptureState};
use dashmap::DashMap;
use parking_lot::RwLock;
use reqwest::Url;
use vigil_core::prelude::*;

/// Attribute keys recorded on network spans.
pub mod attributes {
    /// Full request URL.
    pub const URL: &str = "url.full";
    /// Request method.
    pub const METHOD: &str = "http.request.method";
    /// Request body size in bytes.
    pub const REQUEST_BODY_SIZE: &str = "http.request.body.size";
    /// Response status code.
    pub const STATUS_CODE: &str = "http.response.status_code";
    /// Response body size in bytes.
    pub const RESPONSE_BODY_SIZE: &str = "http.response.body.size";
}

/// Host-assigned handle identifying one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub u64);

/// An outgoing request as seen by the host.
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    /// HTTP method. May be empty.
    pub method: String,
    /// Request URL.
    pub url: Url,
    /// Request body size, when known.
    pub body_size: Option<u64>,
}

impl NetworkRequest {
    /// Request with no body.
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into(),
            url,
            body_size: None,
        }
    }

    /// Set the body size.
    pub fn with_body_size(mut self, size: u64) -> Self {
        self.body_size = Some(size);
        self
    }

    fn span_name(&self) -> String {
        if self.method.is_empty() {
            self.url.path().to_string()
        } else {
            format!("{} {}", self.method, self.url.path())
        }
    }
}

/// How a request finished.
#[derive(Debug, Clone, Default)]
pub struct NetworkResponse {
    /// Status code, if a response arrived.
    pub status_code: Option<u16>,
    /// Response body size, when known.
    pub body_size: Option<u64>,
    /// Transport error, if the request failed.
    pub error: Option<SpanError>,
}

impl NetworkResponse {
    /// A response with `status_code`.
    pub fn status(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            ..Self::default()
        }
    }

    /// A transport failure.
    pub fn failed(error: SpanError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Set the body size.
    pub fn with_body_size(mut self, size: u64) -> Self {
        self.body_size = Some(size);
        self
    }
}

/// Records one span per HTTP request.
///
/// Spans live in a table keyed by [`TaskHandle`] from `on_task_start` until
/// `on_task_finish`. Events arriving while the service is not listening are
/// ignored.
pub struct NetworkCaptureService {
    tracer: Tracer,
    state: RwLock<CaptureState>,
    spans: DashMap<TaskHandle, RecordingSpan>,
}

impl NetworkCaptureService {
    /// Service recording through `tracer`.
    pub fn new(tracer: Tracer) -> Self {
        Self {
            tracer,
            state: RwLock::new(CaptureState::Initialized),
            spans: DashMap::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> CaptureState {
        *self.state.read()
    }

    /// Requests started but not finished.
    pub fn tracked_tasks(&self) -> usize {
        self.spans.len()
    }

    fn listening(&self) -> bool {
        self.state() == CaptureState::Listening
    }

    /// A request was sent.
    pub fn on_task_start(&self, task: TaskHandle, request: &NetworkRequest) {
        if !self.listening() {
            return;
        }

        let mut builder = self
            .tracer
            .span_builder(request.span_name(), SpanType::NetworkHttp)
            .with_attribute(attributes::URL, request.url.as_str());
        if !request.method.is_empty() {
            builder = builder.with_attribute(attributes::METHOD, request.method.as_str());
        }
        if let Some(size) = request.body_size {
            builder = builder.with_attribute(attributes::REQUEST_BODY_SIZE, clamp(size));
        }

        self.spans.insert(task, builder.start());
    }

    /// A request completed or failed.
    pub fn on_task_finish(&self, task: TaskHandle, response: &NetworkResponse) {
        if !self.listening() {
            return;
        }
        let Some((_, span)) = self.spans.remove(&task) else {
            return;
        };

        if let Some(status) = response.status_code {
            span.set_attribute(attributes::STATUS_CODE, i64::from(status));
        }
        if let Some(size) = response.body_size {
            span.set_attribute(attributes::RESPONSE_BODY_SIZE, clamp(size));
        }

        let now = self.tracer.clock().now();
        match &response.error {
            Some(error) => span.end_with(EndOptions::at(now).with_error(error.clone())),
            None => span.end_at(now),
        }
    }
}

fn clamp(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

impl CaptureSource for NetworkCaptureService {
    fn name(&self) -> &str {
        "network"
    }

    fn start(&self) {
        *self.state.write() = CaptureState::Listening;
    }

    /// Requests still in flight are ended as abandoned.
    fn stop(&self) {
        *self.state.write() = CaptureState::Paused;

        let tasks: Vec<TaskHandle> = self.spans.iter().map(|entry| *entry.key()).collect();
        if tasks.is_empty() {
            return;
        }
        let now = self.tracer.clock().now();
        let mut abandoned = 0usize;
        for task in tasks {
            if let Some((_, span)) = self.spans.remove(&task) {
                span.end_with(EndOptions::at(now).with_error_code(SpanErrorCode::UserAbandon));
                abandoned += 1;
            }
        }
        tracing::debug!(abandoned, "Network capture stopped with requests in flight");
    }
}
