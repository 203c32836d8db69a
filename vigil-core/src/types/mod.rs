//! Strongly-typed identifiers.

mod ids;

pub use ids::{ProcessId, SessionId, SpanId, TraceId};
