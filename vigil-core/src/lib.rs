//! Vigil Core Library
//!
//! This crate provides the data model and the durable storage engine for the
//! vigil on-device telemetry pipeline.
//!
//! # Key Components
//!
//! - **Span**: In-memory span lifecycle (start, mutate, end) with a pluggable
//!   processor hook that decouples persistence from span mechanics
//! - **Storage**: Crash-safe record store for sessions, span rows and
//!   resources, backed by an append-only CRC-framed log
//! - **Types**: Strongly-typed identifiers for sessions, traces, spans and
//!   processes
//!
//! # Example
//!
//! ```ignore
//! use vigil_core::prelude::*;
//!
//! let storage = Storage::open(StorageConfig::default().with_directory("/var/lib/app/vigil"))?;
//!
//! let session = SessionRecord::new(SessionId::new(), ProcessId::current(), Utc::now());
//! storage.add_session(session.clone())?;
//!
//! let latest = storage.fetch_latest_session();
//! assert_eq!(latest.map(|s| s.id), Some(session.id));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod prelude;
pub mod resource;
pub mod session;
pub mod span;
pub mod storage;
pub mod testing;
pub mod types;
pub mod value;

pub use error::{Result, ResultExt, VigilError};
pub use resource::{ResourceRecord, ResourceScope};
pub use session::{SessionRecord, SessionState};
pub use span::{RecordingSpan, SpanData, SpanProcessor, SpanStatus, SpanType, Tracer};
pub use storage::{Storage, StorageConfig};
pub use types::{ProcessId, SessionId, SpanId, TraceId};
pub use value::{AttributeValue, Attributes};
