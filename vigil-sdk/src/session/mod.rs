//! Session lifecycle.
//!
//! States move `none -> foreground <-> background -> ended`. A crashed
//! session is not a live state: it is detected on the next launch as a
//! session with no end time, and closed by [`correlate_crash`] when the
//! crash collector reports it.

mod controller;
mod heartbeat;

pub use controller::{
    CrashCorrelation, SESSION_ID_ATTRIBUTE, SESSION_SPAN_NAME, SessionController, correlate_crash,
};
pub use heartbeat::Heartbeat;
