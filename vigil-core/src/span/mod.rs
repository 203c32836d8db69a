//! Span/tracer core.
//!
//! Spans live in memory while recording. Persistence is decoupled through the
//! [`SpanProcessor`] hook, which fires when a span starts and when it ends.

mod data;
mod processor;
mod recording;
mod tracer;

pub use data::{
    EndOptions, SpanData, SpanError, SpanErrorCode, SpanEvent, SpanStatus, SpanType, attribute_keys,
};
pub use processor::{NoopSpanProcessor, SpanProcessor};
pub use recording::RecordingSpan;
pub use tracer::{SpanBuilder, Tracer};
