//! Tracer and span builder.

use super::data::{EndOptions, SpanData, SpanErrorCode, SpanEvent, SpanStatus, SpanType, attribute_keys};
use super::processor::SpanProcessor;
use super::recording::RecordingSpan;
use crate::testing::{ClockProvider, RealClock};
use crate::types::{SpanId, TraceId};
use crate::value::{AttributeValue, Attributes};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Creates spans and routes their lifecycle to a [`SpanProcessor`].
#[derive(Clone)]
pub struct Tracer {
    processor: Arc<dyn SpanProcessor>,
    clock: Arc<dyn ClockProvider>,
}

impl Tracer {
    /// Create a tracer using the system clock.
    pub fn new(processor: Arc<dyn SpanProcessor>) -> Self {
        Self {
            processor,
            clock: Arc::new(RealClock::new()),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// The clock used for default timestamps.
    pub fn clock(&self) -> &Arc<dyn ClockProvider> {
        &self.clock
    }

    /// Begin building a span.
    pub fn span_builder(&self, name: impl Into<String>, span_type: SpanType) -> SpanBuilder<'_> {
        SpanBuilder {
            tracer: self,
            name: name.into(),
            span_type,
            parent: None,
            start_time: None,
            attributes: Attributes::new(),
            error_code: None,
        }
    }

    /// Start a span now.
    pub fn start_span(
        &self,
        name: impl Into<String>,
        span_type: SpanType,
        attributes: Attributes,
    ) -> RecordingSpan {
        self.span_builder(name, span_type)
            .with_attributes(attributes)
            .start()
    }

    /// Run `f` inside a span that ends when `f` returns.
    pub fn record_span<T>(
        &self,
        name: impl Into<String>,
        span_type: SpanType,
        f: impl FnOnce(&RecordingSpan) -> T,
    ) -> T {
        let span = self.span_builder(name, span_type).start();
        let result = f(&span);
        span.end();
        result
    }

    /// Record a span that already happened.
    pub fn record_completed_span(
        &self,
        name: impl Into<String>,
        span_type: SpanType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        error_code: Option<SpanErrorCode>,
    ) -> SpanData {
        let mut builder = self
            .span_builder(name, span_type)
            .with_start_time(start_time);
        builder.error_code = error_code;
        builder.record_completed(end_time, Vec::new())
    }
}

/// Builder for spans that need a parent, explicit start time or a
/// pre-marked error code.
pub struct SpanBuilder<'a> {
    tracer: &'a Tracer,
    name: String,
    span_type: SpanType,
    parent: Option<(TraceId, SpanId)>,
    start_time: Option<DateTime<Utc>>,
    attributes: Attributes,
    error_code: Option<SpanErrorCode>,
}

impl<'a> SpanBuilder<'a> {
    /// Make the span a child of `parent`, sharing its trace.
    #[must_use]
    pub fn with_parent(mut self, parent: &RecordingSpan) -> Self {
        self.parent = Some((parent.trace_id(), parent.span_id()));
        self
    }

    /// Make the span a child of an explicit trace/span pair.
    #[must_use]
    pub fn with_parent_ids(mut self, trace_id: TraceId, span_id: SpanId) -> Self {
        self.parent = Some((trace_id, span_id));
        self
    }

    /// Start at an explicit time.
    #[must_use]
    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Add one attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add several attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes.extend(attributes);
        self
    }

    /// Pre-mark the span as failed with `code`.
    #[must_use]
    pub fn with_error_code(mut self, code: SpanErrorCode) -> Self {
        self.error_code = Some(code);
        self
    }

    fn build(self) -> (SpanData, &'a Tracer) {
        let tracer = self.tracer;
        let (trace_id, parent_span_id) = match self.parent {
            Some((trace_id, parent)) => (trace_id, Some(parent)),
            None => (TraceId::new(), None),
        };

        let mut attributes = self.attributes;
        attributes.insert(
            attribute_keys::TYPE.to_string(),
            AttributeValue::String(self.span_type.as_str().to_string()),
        );

        let mut status = SpanStatus::Unset;
        if let Some(code) = self.error_code {
            attributes.insert(
                attribute_keys::ERROR_CODE.to_string(),
                AttributeValue::String(code.as_str().to_string()),
            );
            status = SpanStatus::Error;
        }

        let data = SpanData {
            trace_id,
            span_id: SpanId::new(),
            parent_span_id,
            name: self.name,
            span_type: self.span_type,
            start_time: self.start_time.unwrap_or_else(|| tracer.clock.now()),
            end_time: None,
            status,
            attributes,
            events: Vec::new(),
        };
        (data, tracer)
    }

    /// Start the span and notify the processor.
    pub fn start(self) -> RecordingSpan {
        let (data, tracer) = self.build();
        RecordingSpan::start(data, tracer.processor.clone(), tracer.clock.clone())
    }

    /// Record the span as already completed at `end_time`.
    pub fn record_completed(self, end_time: DateTime<Utc>, events: Vec<SpanEvent>) -> SpanData {
        let (mut data, tracer) = self.build();
        data.events = events;
        data.apply_end(end_time, EndOptions::at(end_time));
        tracer.processor.on_end(&data);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::NoopSpanProcessor;
    use crate::testing::MockClock;

    fn tracer() -> Tracer {
        Tracer::new(Arc::new(NoopSpanProcessor)).with_clock(Arc::new(MockClock::from_millis(5_000)))
    }

    #[test]
    fn child_span_shares_trace() {
        let tracer = tracer();
        let parent = tracer.start_span("parent", SpanType::Performance, Attributes::new());
        let child = tracer
            .span_builder("child", SpanType::Performance)
            .with_parent(&parent)
            .start();

        let data = child.snapshot();
        assert_eq!(data.trace_id, parent.trace_id());
        assert_eq!(data.parent_span_id, Some(parent.span_id()));
    }

    #[test]
    fn builder_applies_start_time_and_attributes() {
        let tracer = tracer();
        let start = tracer.clock().now() - chrono::Duration::seconds(3);
        let span = tracer
            .span_builder("launch", SpanType::Performance)
            .with_start_time(start)
            .with_attribute("cold", true)
            .start();

        let data = span.snapshot();
        assert_eq!(data.start_time, start);
        assert!(data.parent_span_id.is_none());
        assert_eq!(data.attributes.get("cold"), Some(&AttributeValue::from(true)));
    }

    #[test]
    fn record_span_ends_span() {
        let tracer = tracer();
        let span = tracer.record_span("work", SpanType::System, |span| {
            span.set_attribute("step", 1i64);
            span.clone()
        });
        assert!(!span.is_recording());
        assert_eq!(span.status(), SpanStatus::Ok);
    }

    #[test]
    fn completed_span_has_both_times() {
        let tracer = tracer();
        let start = tracer.clock().now();
        let end = start + chrono::Duration::milliseconds(40);
        let data = tracer.record_completed_span("launch", SpanType::Performance, start, end, None);

        assert_eq!(data.start_time, start);
        assert_eq!(data.end_time, Some(end));
        assert_eq!(data.status, SpanStatus::Ok);
    }

    #[test]
    fn pre_marked_error_code_survives_end() {
        let tracer = tracer();
        let span = tracer
            .span_builder("launch", SpanType::Performance)
            .with_error_code(SpanErrorCode::Unknown)
            .start();
        assert_eq!(span.status(), SpanStatus::Error);

        span.end();
        assert_eq!(span.status(), SpanStatus::Error);
        assert_eq!(
            span.attributes().get(attribute_keys::ERROR_CODE),
            Some(&AttributeValue::String("unknown".to_string()))
        );
    }
}
