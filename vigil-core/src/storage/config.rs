//! Storage configuration.

use std::path::PathBuf;

/// Default log file name.
pub const DEFAULT_FILE_NAME: &str = "vigil.log";

/// Configuration for opening a [`Storage`](super::Storage).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the log file.
    pub directory: PathBuf,
    /// Log file name inside `directory`.
    pub file_name: String,
    /// Whether to fsync after each mutation.
    ///
    /// When false, writes are buffered and synced according to
    /// `group_commit`, or only on flush.
    pub sync_on_write: bool,
    /// Buffer size for writes.
    pub buffer_size: usize,
    /// Batch fsyncs instead of syncing each mutation.
    pub group_commit: Option<GroupCommitConfig>,
    /// Log size in bytes above which the live state is rewritten into a
    /// fresh file. `None` disables compaction.
    pub compaction_threshold: Option<u64>,
}

/// Group commit settings for batching fsyncs.
///
/// A sync happens once `max_batch_size` mutations are pending or
/// `max_delay_ms` has elapsed since the last sync, whichever comes first.
#[derive(Debug, Clone, Copy)]
pub struct GroupCommitConfig {
    /// Maximum delay in milliseconds before forcing a sync.
    pub max_delay_ms: u64,
    /// Maximum number of mutations to batch before forcing a sync.
    pub max_batch_size: usize,
}

impl Default for GroupCommitConfig {
    fn default() -> Self {
        Self {
            max_delay_ms: 10,
            max_batch_size: 100,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("vigil"),
            file_name: DEFAULT_FILE_NAME.to_string(),
            sync_on_write: true,
            buffer_size: 64 * 1024,
            group_commit: None,
            compaction_threshold: Some(4 * 1024 * 1024),
        }
    }
}

impl StorageConfig {
    /// A throwaway configuration in a fresh temp directory.
    pub fn in_memory() -> Self {
        Self {
            directory: std::env::temp_dir().join(format!("vigil_storage_{}", uuid::Uuid::new_v4())),
            sync_on_write: false,
            ..Self::default()
        }
    }

    /// Set the directory.
    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = dir.into();
        self
    }

    /// Set the log file name.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    /// Set sync on write. When true, group commit is ignored.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Enable group commit. Disables sync on write.
    pub fn with_group_commit(mut self, config: GroupCommitConfig) -> Self {
        self.sync_on_write = false;
        self.group_commit = Some(config);
        self
    }

    /// Set the compaction threshold in bytes.
    pub fn with_compaction_threshold(mut self, threshold: Option<u64>) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Full path of the log file.
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}
