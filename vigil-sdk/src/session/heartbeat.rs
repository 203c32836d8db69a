//! Periodic heartbeat for the active session.

use super::controller::SessionController;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Background task stamping `last_heartbeat_time` on the active session.
///
/// The heartbeat is a forensic signal for the next launch's reconciler. It
/// does not enforce liveness.
pub struct Heartbeat {
    controller: Arc<SessionController>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl Heartbeat {
    /// Heartbeat for `controller` every `interval`.
    pub fn new(controller: Arc<SessionController>, interval: Duration) -> Self {
        Self {
            controller,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the loop on the current runtime.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "Heartbeat started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        while self.is_running() {
            ticker.tick().await;
            if !self.is_running() {
                break;
            }
            self.beat();
        }

        tracing::debug!("Heartbeat stopped");
    }

    /// Record one heartbeat now.
    pub fn beat(&self) {
        if let Err(e) = self.controller.heartbeat() {
            tracing::warn!(error = %e, "Failed to record session heartbeat");
        }
    }

    /// Stop the loop after its current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
