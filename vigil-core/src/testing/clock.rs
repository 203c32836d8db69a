//! Clock provider for time abstraction.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Provider trait for wall-clock time.
pub trait ClockProvider: Send + Sync {
    /// The current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Advance time by the specified duration (mock-only operation).
    ///
    /// Real implementations do nothing.
    fn advance(&self, duration: Duration);

    /// Check if this is a mock clock.
    fn is_mock(&self) -> bool;
}

/// Real clock that uses system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Create a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl ClockProvider for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn advance(&self, _duration: Duration) {}

    fn is_mock(&self) -> bool {
        false
    }
}

/// Mock clock with controllable time.
///
/// Time only moves when [`ClockProvider::advance`] is called.
#[derive(Debug)]
pub struct MockClock {
    nanos: AtomicI64,
}

impl MockClock {
    /// Create a mock clock fixed at `time`.
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            nanos: AtomicI64::new(time.timestamp_nanos_opt().unwrap_or_default()),
        }
    }

    /// Create a mock clock fixed at `millis` since the UNIX epoch.
    pub fn from_millis(millis: i64) -> Self {
        Self {
            nanos: AtomicI64::new(millis.saturating_mul(1_000_000)),
        }
    }

    /// Create a mock clock starting at the current system time.
    pub fn at_now() -> Self {
        Self::at(Utc::now())
    }

    /// Jump to an absolute time.
    pub fn set(&self, time: DateTime<Utc>) {
        self.nanos
            .store(time.timestamp_nanos_opt().unwrap_or_default(), Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::from_millis(0)
    }
}

impl ClockProvider for MockClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn advance(&self, duration: Duration) {
        let delta = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        self.nanos.fetch_add(delta, Ordering::SeqCst);
    }

    fn is_mock(&self) -> bool {
        true
    }
}
