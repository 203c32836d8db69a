//! Session change observation.

use crate::session::SessionRecord;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Callback invoked with the full session list after each session change.
pub type SessionObserver = Arc<dyn Fn(&[SessionRecord]) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: AtomicU64,
    observers: RwLock<BTreeMap<u64, SessionObserver>>,
}

impl ObserverRegistry {
    pub fn register(self: &Arc<Self>, observer: SessionObserver) -> SessionObservation {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().insert(id, observer);
        SessionObservation {
            registry: Arc::downgrade(self),
            id,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    pub fn notify(&self, sessions: &[SessionRecord]) {
        let observers: Vec<SessionObserver> = self.observers.read().values().cloned().collect();
        for observer in observers {
            observer(sessions);
        }
    }

    fn remove(&self, id: u64) {
        self.observers.write().remove(&id);
    }
}

/// Handle to a registered session observer.
///
/// Delivery stops when the handle is cancelled or dropped.
#[must_use = "dropping the observation stops delivery"]
pub struct SessionObservation {
    registry: Weak<ObserverRegistry>,
    id: u64,
}

impl SessionObservation {
    /// Stop receiving updates.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for SessionObservation {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for SessionObservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionObservation")
            .field("id", &self.id)
            .finish()
    }
}
