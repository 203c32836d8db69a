//! Vigil SDK - on-device session telemetry.
//!
//! This crate wires the storage engine and the upload layer into a running
//! pipeline:
//! - Session controller with heartbeat and crash correlation
//! - Span processor persisting every span into the current session
//! - Payload builder producing the versioned session payload
//! - Startup reconciler recovering data left by crashes
//! - Boundaries for the crash collector, device id store and capture sources
//! - The [`Vigil`] context tying them together
//!
//! # Example
//!
//! ```no_run
//! use vigil_sdk::prelude::*;
//!
//! # async fn run() -> vigil_core::Result<()> {
//! let options = VigilOptions::new("a1b2c", "https://a1b2c.data.example.com", "/var/lib/app/vigil");
//! let vigil = Vigil::setup(options, Collaborators::new())?;
//!
//! vigil.start().await?;
//! vigil
//!     .tracer()
//!     .record_span("load-feed", SpanType::Performance, |span| {
//!         span.set_attribute("items", 20);
//!     });
//! vigil.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod capture;
pub mod crash;
pub mod delivery;
pub mod device_id;
pub mod observability;
pub mod options;
pub mod payload;
pub mod processor;
pub mod reconciler;
pub mod session;
pub mod vigil;

pub use options::VigilOptions;
pub use vigil::{Collaborators, Vigil};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::capture::{
        CaptureSource, CaptureState, NetworkCaptureService, NetworkRequest, NetworkResponse,
        ResourceCaptureService, TaskHandle,
    };
    pub use crate::crash::{CrashReport, CrashReporter, DirectoryCrashReporter, MemoryCrashReporter};
    pub use crate::delivery::{SessionDelivery, StagedSession};
    pub use crate::device_id::{DeviceIdStore, FileDeviceIdStore, MemoryDeviceIdStore};
    pub use crate::observability::{LogFormat, TracingConfig, init_tracing};
    pub use crate::options::VigilOptions;
    pub use crate::payload::{SessionPayload, SessionPayloadBuilder};
    pub use crate::processor::{CurrentSession, StorageSpanProcessor};
    pub use crate::reconciler::{ReconcileReport, UnsentDataReconciler};
    pub use crate::session::{CrashCorrelation, Heartbeat, SessionController};
    pub use crate::vigil::{Collaborators, Vigil};
    pub use vigil_core::prelude::*;
    pub use vigil_upload::{DispatchReport, RedundancyOptions, Uploader};
}
