//! Span processor hook.

use super::data::SpanData;

/// Receives span lifecycle notifications.
///
/// Implementations must not block for long; they run on the thread that
/// starts or ends the span.
pub trait SpanProcessor: Send + Sync {
    /// Called after a span starts.
    fn on_start(&self, span: &SpanData);

    /// Called after a span ends. May fire more than once for the same span.
    fn on_end(&self, span: &SpanData);
}

/// Processor that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSpanProcessor;

impl SpanProcessor for NoopSpanProcessor {
    fn on_start(&self, _span: &SpanData) {}

    fn on_end(&self, _span: &SpanData) {}
}
