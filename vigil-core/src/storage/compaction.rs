//! Log compaction.
//!
//! The live state is written as upserts into a sibling file, which is then
//! renamed over the log. A crash before the rename leaves the old log intact.

use super::log::LogWriter;
use super::record::{HEADER_SIZE, write_header};
use super::state::StorageState;
use crate::error::{Result, VigilError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Outcome of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
    /// Records in the compacted log.
    pub records: usize,
}

/// Rewrite the log held by `writer` so it contains only `state`.
pub(crate) fn compact(
    writer: &mut LogWriter,
    state: &StorageState,
    timestamp_ms: i64,
) -> Result<CompactionReport> {
    writer.sync()?;

    let path = writer.path().to_path_buf();
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".compact");
    let tmp_path = path.with_file_name(tmp_name);

    let result = write_snapshot(&tmp_path, state, timestamp_ms).and_then(|(file, size, records)| {
        std::fs::rename(&tmp_path, &path).map_err(|e| VigilError::StorageWrite {
            cause: format!("Failed to swap compacted log: {}", e),
        })?;
        Ok((file, size, records))
    });

    let (file, bytes_after, records) = match result {
        Ok(parts) => parts,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
    };

    if let Some(dir) = path.parent().and_then(|d| File::open(d).ok()) {
        let _ = dir.sync_all();
    }

    let bytes_before = writer.file_size();
    writer.swap(file, bytes_after)?;

    Ok(CompactionReport {
        bytes_before,
        bytes_after,
        records,
    })
}

fn write_snapshot(
    tmp_path: &Path,
    state: &StorageState,
    timestamp_ms: i64,
) -> Result<(File, u64, usize)> {
    let io_error = |e: std::io::Error| VigilError::StorageWrite {
        cause: format!("Failed to write {}: {}", tmp_path.display(), e),
    };

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(tmp_path)
        .map_err(io_error)?;
    file.try_lock_exclusive().map_err(io_error)?;

    let mut out = BufWriter::new(file);
    write_header(&mut out).map_err(io_error)?;

    let mut size = HEADER_SIZE;
    let mutations = state.snapshot_mutations();
    for mutation in &mutations {
        let bytes = mutation
            .to_record(timestamp_ms)?
            .to_bytes()
            .map_err(io_error)?;
        out.write_all(&bytes).map_err(io_error)?;
        size += bytes.len() as u64;
    }

    let file = out.into_inner().map_err(|e| io_error(e.into_error()))?;
    file.sync_all().map_err(io_error)?;
    Ok((file, size, mutations.len()))
}
