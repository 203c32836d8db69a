//! Time abstraction for deterministic tests.
//!
//! Production code reads time through [`ClockProvider`] so that tests can
//! pin timestamps with [`MockClock`].

mod clock;

pub use clock::{ClockProvider, MockClock, RealClock};
