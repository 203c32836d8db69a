//! Recording span handle.

use super::data::{EndOptions, SpanData, SpanEvent, SpanStatus};
use super::processor::SpanProcessor;
use crate::testing::ClockProvider;
use crate::types::{SpanId, TraceId};
use crate::value::{AttributeValue, Attributes};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A live span.
///
/// Cloning yields another handle to the same span. All mutation goes through
/// a per-span lock, so a capture source can hand the span to another thread
/// for completion.
#[derive(Clone)]
pub struct RecordingSpan {
    data: Arc<Mutex<SpanData>>,
    processor: Arc<dyn SpanProcessor>,
    clock: Arc<dyn ClockProvider>,
}

impl RecordingSpan {
    pub(crate) fn start(
        data: SpanData,
        processor: Arc<dyn SpanProcessor>,
        clock: Arc<dyn ClockProvider>,
    ) -> Self {
        processor.on_start(&data);
        Self {
            data: Arc::new(Mutex::new(data)),
            processor,
            clock,
        }
    }

    /// Span identifier.
    pub fn span_id(&self) -> SpanId {
        self.data.lock().span_id
    }

    /// Trace identifier.
    pub fn trace_id(&self) -> TraceId {
        self.data.lock().trace_id
    }

    /// Span name.
    pub fn name(&self) -> String {
        self.data.lock().name.clone()
    }

    /// Current status.
    pub fn status(&self) -> SpanStatus {
        self.data.lock().status
    }

    /// End time, if the span has ended.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.data.lock().end_time
    }

    /// Whether the span is still recording.
    pub fn is_recording(&self) -> bool {
        self.data.lock().is_recording()
    }

    /// Copy of the current attributes.
    pub fn attributes(&self) -> Attributes {
        self.data.lock().attributes.clone()
    }

    /// Copy of the current events.
    pub fn events(&self) -> Vec<SpanEvent> {
        self.data.lock().events.clone()
    }

    /// Snapshot of the whole span.
    pub fn snapshot(&self) -> SpanData {
        self.data.lock().clone()
    }

    /// Set or replace an attribute.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.data.lock().attributes.insert(key.into(), value.into());
    }

    /// Set the status explicitly.
    pub fn set_status(&self, status: SpanStatus) {
        self.data.lock().status = status;
    }

    /// Append an event stamped with the current time.
    pub fn add_event(&self, name: impl Into<String>, attributes: Attributes) {
        let now = self.clock.now();
        self.add_event_at(name, now, attributes);
    }

    /// Append an event with an explicit timestamp.
    pub fn add_event_at(
        &self,
        name: impl Into<String>,
        timestamp: DateTime<Utc>,
        attributes: Attributes,
    ) {
        self.data
            .lock()
            .events
            .push(SpanEvent::new(name, timestamp, attributes));
    }

    /// End the span now.
    pub fn end(&self) {
        self.end_with(EndOptions::default());
    }

    /// End the span at `time`.
    pub fn end_at(&self, time: DateTime<Utc>) {
        self.end_with(EndOptions::at(time));
    }

    /// End the span with explicit options.
    ///
    /// Ending twice overwrites the end time and notifies the processor again.
    pub fn end_with(&self, options: EndOptions) {
        let time = options.time.unwrap_or_else(|| self.clock.now());
        let snapshot = {
            let mut data = self.data.lock();
            data.apply_end(time, options);
            data.clone()
        };
        self.processor.on_end(&snapshot);
    }
}

impl fmt::Debug for RecordingSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.lock();
        write!(
            f,
            "RecordingSpan {{ name: '{}', trace_id: {}, span_id: {}, status: {:?}, recording: {} }}",
            data.name,
            data.trace_id,
            data.span_id,
            data.status,
            data.is_recording()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::{SpanError, SpanErrorCode, SpanType, Tracer, attribute_keys};
    use super::*;
    use crate::testing::MockClock;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingProcessor {
        ended: Mutex<Vec<SpanData>>,
        started: Mutex<usize>,
    }

    impl SpanProcessor for CountingProcessor {
        fn on_start(&self, _span: &SpanData) {
            *self.started.lock() += 1;
        }

        fn on_end(&self, span: &SpanData) {
            self.ended.lock().push(span.clone());
        }
    }

    fn tracer() -> (Tracer, Arc<CountingProcessor>, Arc<MockClock>) {
        let processor = Arc::new(CountingProcessor::default());
        let clock = Arc::new(MockClock::from_millis(1_000_000));
        let tracer = Tracer::new(processor.clone()).with_clock(clock.clone());
        (tracer, processor, clock)
    }

    #[test]
    fn recording_until_ended() {
        let (tracer, processor, _) = tracer();
        let span = tracer.start_span("example", SpanType::Performance, Attributes::new());
        assert!(span.is_recording());
        assert!(span.end_time().is_none());
        assert_eq!(*processor.started.lock(), 1);

        span.end();
        assert!(!span.is_recording());
        assert_eq!(processor.ended.lock().len(), 1);
    }

    #[test]
    fn set_attribute_sets_attribute() {
        let (tracer, _, _) = tracer();
        let span = tracer.start_span("example", SpanType::Performance, Attributes::new());
        span.set_attribute("foo", "bar");
        assert_eq!(
            span.attributes().get("foo"),
            Some(&AttributeValue::String("bar".to_string()))
        );
        assert_eq!(
            span.attributes().get(attribute_keys::TYPE),
            Some(&AttributeValue::String("perf".to_string()))
        );
    }

    #[test]
    fn events_keep_call_order() {
        let (tracer, _, clock) = tracer();
        let span = tracer.start_span("example", SpanType::Ux, Attributes::new());

        span.add_event("first", Attributes::new());
        clock.advance(Duration::from_millis(5));
        let mut attrs = Attributes::new();
        attrs.insert("foo".into(), "bar".into());
        span.add_event("second", attrs.clone());
        let explicit = clock.now() - chrono::Duration::seconds(60);
        span.add_event_at("third", explicit, Attributes::new());

        let events = span.events();
        let names: Vec<_> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["first", "second", "third"]);
        assert_eq!(events[1].attributes, attrs);
        assert_eq!(events[2].timestamp, explicit);
    }

    #[test]
    fn end_uses_clock_or_explicit_time() {
        let (tracer, _, clock) = tracer();
        let span = tracer.start_span("a", SpanType::Performance, Attributes::new());
        span.end();
        assert_eq!(span.end_time(), Some(clock.now()));

        let other = tracer.start_span("b", SpanType::Performance, Attributes::new());
        let at = clock.now() + chrono::Duration::seconds(3);
        other.end_at(at);
        assert_eq!(other.end_time(), Some(at));
    }

    #[test]
    fn end_sets_ok_if_unset() {
        let (tracer, _, _) = tracer();
        let span = tracer.start_span("example", SpanType::Performance, Attributes::new());
        assert_eq!(span.status(), SpanStatus::Unset);
        span.end();
        assert_eq!(span.status(), SpanStatus::Ok);
    }

    #[test]
    fn end_preserves_explicit_error() {
        let (tracer, _, _) = tracer();
        let span = tracer.start_span("example", SpanType::Performance, Attributes::new());
        span.set_status(SpanStatus::Error);
        span.end();
        assert_eq!(span.status(), SpanStatus::Error);
    }

    #[test]
    fn end_with_error_code() {
        let (tracer, _, _) = tracer();
        let span = tracer.start_span("example", SpanType::Performance, Attributes::new());
        span.end_with(EndOptions::default().with_error_code(SpanErrorCode::Failure));

        assert_eq!(span.status(), SpanStatus::Error);
        assert_eq!(
            span.attributes().get(attribute_keys::ERROR_CODE),
            Some(&AttributeValue::String("failure".to_string()))
        );
        assert!(span.end_time().is_some());
    }

    #[test]
    fn end_with_error_records_details() {
        let (tracer, _, _) = tracer();
        let span = tracer.start_span("example", SpanType::Performance, Attributes::new());
        span.end_with(
            EndOptions::default().with_error(SpanError::new("com.vigil.test", 123, "boom")),
        );

        let attrs = span.attributes();
        assert_eq!(
            attrs.get(attribute_keys::ERROR_MESSAGE),
            Some(&AttributeValue::String("boom".to_string()))
        );
        assert_eq!(
            attrs.get(attribute_keys::ERROR_NUMERIC_CODE),
            Some(&AttributeValue::Int(123))
        );
        assert_eq!(
            attrs.get(attribute_keys::ERROR_CODE),
            Some(&AttributeValue::String("failure".to_string()))
        );
        assert_eq!(span.status(), SpanStatus::Error);
    }

    #[test]
    fn explicit_error_code_wins_over_error() {
        let (tracer, _, _) = tracer();
        let span = tracer.start_span("example", SpanType::Performance, Attributes::new());
        span.end_with(
            EndOptions::default()
                .with_error(SpanError::new("com.vigil.test", 123, "boom"))
                .with_error_code(SpanErrorCode::UserAbandon),
        );
        assert_eq!(
            span.attributes().get(attribute_keys::ERROR_CODE),
            Some(&AttributeValue::String("user_abandon".to_string()))
        );
    }

    #[test]
    fn second_end_overwrites_end_time() {
        let (tracer, processor, clock) = tracer();
        let span = tracer.start_span("example", SpanType::Performance, Attributes::new());
        span.end();
        let first = span.end_time();

        clock.advance(Duration::from_secs(2));
        span.end();

        assert_ne!(span.end_time(), first);
        assert_eq!(span.end_time(), Some(clock.now()));
        assert_eq!(processor.ended.lock().len(), 2);
        assert_eq!(span.status(), SpanStatus::Ok);
    }

    #[test]
    fn debug_output_is_descriptive() {
        let (tracer, _, _) = tracer();
        let span = tracer.start_span("example", SpanType::Performance, Attributes::new());
        let description = format!("{:?}", span);
        assert!(description.contains("RecordingSpan"));
        assert!(description.contains("'example'"));
    }
}
