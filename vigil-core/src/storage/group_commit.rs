//! Batched fsync bookkeeping for the log writer.

use super::config::GroupCommitConfig;
use std::time::{Duration, Instant};

/// Mutations appended since the last fsync.
///
/// Owned by the writer, which already holds the storage lock, so plain
/// fields are enough.
#[derive(Debug)]
pub(super) struct SyncBatch {
    limit: usize,
    max_age: Duration,
    unsynced: usize,
    opened_at: Instant,
}

impl SyncBatch {
    pub fn new(config: GroupCommitConfig) -> Self {
        Self {
            limit: config.max_batch_size.max(1),
            max_age: Duration::from_millis(config.max_delay_ms),
            unsynced: 0,
            opened_at: Instant::now(),
        }
    }

    pub fn push(&mut self) {
        if self.unsynced == 0 {
            self.opened_at = Instant::now();
        }
        self.unsynced += 1;
    }

    /// A non-empty batch is due once it is full or has been open too long.
    pub fn is_due(&self) -> bool {
        self.unsynced > 0
            && (self.unsynced >= self.limit || self.opened_at.elapsed() >= self.max_age)
    }

    pub fn clear(&mut self) {
        self.unsynced = 0;
    }

    #[cfg(test)]
    pub fn unsynced(&self) -> usize {
        self.unsynced
    }
}
