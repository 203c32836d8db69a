//! Diagnostic logging for the pipeline.
//!
//! Every failure the pipeline swallows is reported through `tracing`. This
//! module offers an optional subscriber for hosts that have none:
//!
//! - `VIGIL_LOG_FORMAT`: `json`, `pretty` or `compact`
//! - `VIGIL_LOG` (falls back to `RUST_LOG`): filter directives
//!
//! ```ignore
//! use vigil_sdk::observability::{TracingConfig, init_tracing};
//!
//! init_tracing(&TracingConfig::from_env())?;
//! ```

mod config;
mod tracing_setup;

pub use config::{DEFAULT_FILTER, LogFormat, TracingConfig};
pub use tracing_setup::init_tracing;
