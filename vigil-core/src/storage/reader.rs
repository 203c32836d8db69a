//! Log replay.

use super::record::{HEADER_SIZE, LogRecord, MAX_FRAME_SIZE, MIN_FRAME_SIZE, read_header};
use crate::error::{Result, VigilError};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Result of reading a log file.
#[derive(Debug, Default)]
pub(crate) struct ReplayOutcome {
    /// Intact records in file order.
    pub records: Vec<LogRecord>,
    /// Length of the file prefix made of whole frames.
    pub valid_len: u64,
    /// Frames skipped because their CRC did not match.
    pub skipped: usize,
    /// Bytes after the last whole frame, discarded on open.
    pub torn_bytes: u64,
    /// Offset of a frame whose length prefix is out of range. Nothing after
    /// it can be framed, so the replay stops there.
    pub bad_length_at: Option<u64>,
}

/// Read every frame of the log at `path`.
///
/// A frame cut short by a crash ends the replay. Frames that are complete
/// but fail their CRC are skipped. A damaged length prefix also ends the
/// replay, losing every frame after it.
pub(crate) fn replay(path: &Path) -> Result<ReplayOutcome> {
    let read_error = |e: std::io::Error| VigilError::StorageRead {
        cause: format!("Failed to read {}: {}", path.display(), e),
    };

    let file = File::open(path).map_err(read_error)?;
    let len = file.metadata().map_err(read_error)?.len();
    let mut reader = BufReader::new(file);

    read_header(&mut reader).map_err(|cause| VigilError::StorageSchema {
        path: path.to_path_buf(),
        cause,
    })?;

    let mut outcome = ReplayOutcome::default();
    let mut position = HEADER_SIZE;

    while position < len {
        let remaining = len - position;
        if remaining < MIN_FRAME_SIZE as u64 {
            break;
        }

        let length = reader.read_u32::<LittleEndian>().map_err(read_error)? as usize;
        if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&length) {
            outcome.bad_length_at = Some(position);
            break;
        }
        if length as u64 > remaining {
            break;
        }

        let mut buf = vec![0u8; length];
        buf[..4].copy_from_slice(&(length as u32).to_le_bytes());
        reader.read_exact(&mut buf[4..]).map_err(read_error)?;

        match LogRecord::from_bytes(&buf) {
            Ok(record) => outcome.records.push(record),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    position,
                    error = %e,
                    "Skipping corrupted storage record"
                );
                outcome.skipped += 1;
            }
        }
        position += length as u64;
    }

    outcome.valid_len = position;
    outcome.torn_bytes = len - position;
    Ok(outcome)
}
