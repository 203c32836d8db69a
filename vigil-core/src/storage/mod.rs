//! Crash-safe storage for sessions, span rows and resources.
//!
//! Every mutation is appended to a single CRC-framed log before it is
//! applied to the in-memory indexes. On open the log is replayed to rebuild
//! the indexes. A record cut short by a crash is discarded, and records
//! that fail their checksum are skipped with a warning.
//!
//! All mutations go through one writer lock, giving a single ordered
//! writer per storage instance. The log file is locked exclusively, so a
//! second process cannot open the same store.
//!
//! When the log outgrows the configured threshold, the live rows are
//! rewritten into a fresh file that atomically replaces the old one.

mod compaction;
mod config;
mod engine;
mod group_commit;
mod log;
mod observer;
mod reader;
mod record;
mod state;

pub use compaction::CompactionReport;
pub use config::{DEFAULT_FILE_NAME, GroupCommitConfig, StorageConfig};
pub use engine::{Storage, StorageStats};
pub use observer::{SessionObservation, SessionObserver};
pub use record::{RecordType, SCHEMA_VERSION};
pub use state::{ResourceKey, SessionDeletion, SessionSpans, SpanKey, SpanRecord};
