//! Capture sources.
//!
//! A capture source turns host events into spans or resources. The host
//! integration layer owns the interception mechanism and forwards events
//! through the callbacks each source exposes.

mod network;
mod resource;

pub use network::{NetworkCaptureService, NetworkRequest, NetworkResponse, TaskHandle, attributes};
pub use resource::ResourceCaptureService;

/// Whether a capture source is recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    /// Created but never started.
    #[default]
    Initialized,
    /// Recording events.
    Listening,
    /// Stopped; events are ignored.
    Paused,
}

/// A source of telemetry started and stopped with the pipeline.
pub trait CaptureSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Begin capturing.
    fn start(&self);

    /// Stop capturing.
    fn stop(&self);
}
