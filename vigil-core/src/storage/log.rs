//! Append-only log writer.

use super::config::StorageConfig;
use super::group_commit::SyncBatch;
use super::record::{HEADER_SIZE, LogRecord, write_header};
use crate::error::{Result, VigilError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Exclusive writer over the log file.
pub(crate) struct LogWriter {
    file: BufWriter<File>,
    path: PathBuf,
    file_size: u64,
    baseline_size: u64,
    sync_on_write: bool,
    buffer_size: usize,
    batch: Option<SyncBatch>,
}

impl LogWriter {
    /// Open (or create) and lock the log file.
    ///
    /// A new or empty file gets a header. The file is not replayed here.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let path = config.path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| VigilError::StorageOpen {
                path: path.clone(),
                cause: e.to_string(),
            })?;

        file.try_lock_exclusive()
            .map_err(|_| VigilError::StorageLocked { path: path.clone() })?;

        let mut file_size = file
            .metadata()
            .map_err(|e| VigilError::StorageOpen {
                path: path.clone(),
                cause: e.to_string(),
            })?
            .len();

        let mut writer = BufWriter::with_capacity(config.buffer_size, file);
        if file_size == 0 {
            write_header(&mut writer)
                .and_then(|_| writer.flush())
                .and_then(|_| writer.get_ref().sync_data())
                .map_err(|e| VigilError::StorageOpen {
                    path: path.clone(),
                    cause: format!("Failed to write header: {}", e),
                })?;
            file_size = HEADER_SIZE;
        }

        Ok(Self {
            file: writer,
            path,
            file_size,
            baseline_size: HEADER_SIZE,
            sync_on_write: config.sync_on_write,
            buffer_size: config.buffer_size,
            batch: config.group_commit.map(SyncBatch::new),
        })
    }

    /// Cut the file back to `valid_len` and position for appends.
    pub fn truncate_to(&mut self, valid_len: u64) -> Result<()> {
        self.file.flush().map_err(write_error)?;
        let file = self.file.get_mut();
        if valid_len < self.file_size {
            file.set_len(valid_len).map_err(write_error)?;
            file.sync_data().map_err(write_error)?;
            self.file_size = valid_len;
        }
        file.seek(SeekFrom::End(0)).map_err(write_error)?;
        Ok(())
    }

    /// Append one record to the buffer.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let bytes = record.to_bytes().map_err(write_error)?;
        self.file.write_all(&bytes).map_err(write_error)?;
        self.file_size += bytes.len() as u64;
        if let Some(batch) = &mut self.batch {
            batch.push();
        }
        Ok(())
    }

    /// Hand buffered records to the OS and fsync per the sync policy.
    pub fn commit(&mut self) -> Result<()> {
        self.file.flush().map_err(write_error)?;

        let should_sync =
            self.sync_on_write || self.batch.as_ref().is_some_and(SyncBatch::is_due);

        if should_sync {
            self.sync()?;
        }
        Ok(())
    }

    /// Flush and fsync unconditionally.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush().map_err(write_error)?;
        self.file.get_ref().sync_data().map_err(write_error)?;
        if let Some(batch) = &mut self.batch {
            batch.clear();
        }
        Ok(())
    }

    /// Replace the underlying file with an already written and locked one.
    pub fn swap(&mut self, file: File, size: u64) -> Result<()> {
        self.file.flush().map_err(write_error)?;
        let old = std::mem::replace(
            &mut self.file,
            BufWriter::with_capacity(self.buffer_size, file),
        );
        let _ = FileExt::unlock(old.get_ref());
        self.file_size = size;
        self.baseline_size = size;
        self.file
            .get_mut()
            .seek(SeekFrom::End(0))
            .map_err(write_error)?;
        Ok(())
    }

    /// Whether the log outgrew `threshold` and at least doubled since the
    /// last compaction.
    pub fn should_compact(&self, threshold: u64) -> bool {
        self.file_size > threshold && self.file_size > self.baseline_size.saturating_mul(2)
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.file.flush();
        let _ = FileExt::unlock(self.file.get_ref());
    }
}

fn write_error(e: std::io::Error) -> VigilError {
    VigilError::StorageWrite {
        cause: e.to_string(),
    }
}
