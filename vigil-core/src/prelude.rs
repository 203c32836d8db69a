//! Convenience re-exports for common use.

pub use crate::error::{Result, ResultExt, VigilError};
pub use crate::resource::{ResourceRecord, ResourceScope};
pub use crate::session::{SessionRecord, SessionState};
pub use crate::span::{
    EndOptions, NoopSpanProcessor, RecordingSpan, SpanBuilder, SpanData, SpanError, SpanErrorCode,
    SpanEvent, SpanProcessor, SpanStatus, SpanType, Tracer,
};
pub use crate::storage::{
    SessionObservation, SessionSpans, SpanRecord, Storage, StorageConfig, StorageStats,
};
pub use crate::testing::{ClockProvider, MockClock, RealClock};
pub use crate::types::{ProcessId, SessionId, SpanId, TraceId};
pub use crate::value::{AttributeValue, Attributes};
pub use chrono::{DateTime, Utc};
