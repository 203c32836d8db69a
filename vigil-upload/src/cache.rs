//! Write-ahead upload cache.
//!
//! Each staged payload is one file, written to a temp name and renamed into
//! place, so a crash never exposes a half-written entry. The cache lives
//! apart from the storage log and survives its loss.
//!
//! ```text
//! ┌───────────┬─────────┬────────┬───────┬──────────┬────────────┬─────────┬──────────┬──────┐
//! │ Magic (4) │ Ver (1) │ CRC32  │ Type  │ Attempts │ Created ms │ Id (16) │ Data len │ Data │
//! │           │         │ (4 B)  │ (1 B) │ (4 B)    │ (8 B)      │         │ (4 B)    │      │
//! └───────────┴─────────┴────────┴───────┴──────────┴────────────┴─────────┴──────────┴──────┘
//! ```

use crate::error::{Result, UploadError};
use crate::options::CacheOptions;
use crate::types::{CacheEntry, PayloadType, UploadEntryId};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: [u8; 4] = *b"VGLU";
const FORMAT_VERSION: u8 = 1;
const ENTRY_EXTENSION: &str = "entry";
const TEMP_EXTENSION: &str = "tmp";

/// On-disk cache of staged payloads.
#[derive(Debug)]
pub struct UploadCache {
    directory: PathBuf,
    // Serializes read-modify-write of a single entry file.
    write_lock: Mutex<()>,
}

impl UploadCache {
    /// Open the cache, creating its directory and removing stale temp files.
    pub fn open(options: &CacheOptions) -> Result<Self> {
        let directory = options.directory.clone();
        fs::create_dir_all(&directory).map_err(|e| io_error(&directory, e))?;

        let cache = Self {
            directory,
            write_lock: Mutex::new(()),
        };
        cache.remove_temp_files();
        Ok(cache)
    }

    /// Cache directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Stage a new payload.
    pub fn insert(&self, payload_type: PayloadType, data: Vec<u8>) -> Result<CacheEntry> {
        let entry = CacheEntry::new(payload_type, data);
        self.save(&entry)?;
        Ok(entry)
    }

    /// Write `entry`, replacing any previous version.
    pub fn save(&self, entry: &CacheEntry) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.write_entry(entry)
    }

    /// Read one entry.
    pub fn fetch(&self, id: UploadEntryId) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(id);
        match fs::read(&path) {
            Ok(bytes) => decode(&bytes)
                .map(Some)
                .map_err(|cause| UploadError::CacheCorruption { path, cause }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    /// Every readable entry, oldest first.
    ///
    /// Entries whose bytes fail to decode can never be delivered and are
    /// removed. Entries that cannot be read right now are skipped and kept.
    pub fn fetch_all(&self) -> Result<Vec<CacheEntry>> {
        let read_dir = fs::read_dir(&self.directory).map_err(|e| io_error(&self.directory, e))?;

        let mut entries = Vec::new();
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }

            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping upload cache entry that could not be read"
                    );
                    continue;
                }
            };
            match decode(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(cause) => {
                    tracing::warn!(
                        path = %path.display(),
                        cause = %cause,
                        "Removing damaged upload cache entry"
                    );
                    let _ = fs::remove_file(&path);
                }
            }
        }

        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    /// Delete an entry. Returns whether it existed.
    pub fn delete(&self, id: UploadEntryId) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let path = self.entry_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    /// Increment an entry's attempt count. Returns the new count, or `None`
    /// if the entry no longer exists.
    pub fn record_failed_attempt(&self, id: UploadEntryId) -> Result<Option<u32>> {
        let _guard = self.write_lock.lock();
        let Some(mut entry) = self.fetch(id)? else {
            return Ok(None);
        };
        entry.attempt_count = entry.attempt_count.saturating_add(1);
        self.write_entry(&entry)?;
        Ok(Some(entry.attempt_count))
    }

    /// Number of staged entries.
    pub fn len(&self) -> usize {
        fs::read_dir(&self.directory)
            .map(|rd| {
                rd.flatten()
                    .filter(|e| {
                        e.path().extension().and_then(|x| x.to_str()) == Some(ENTRY_EXTENSION)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_entry(&self, entry: &CacheEntry) -> Result<()> {
        let path = self.entry_path(entry.id);
        let tmp_path = path.with_extension(format!("{}.{}", ENTRY_EXTENSION, TEMP_EXTENSION));

        let bytes = encode(entry).map_err(|e| io_error(&path, e))?;
        let written = File::create(&tmp_path)
            .and_then(|mut file| {
                file.write_all(&bytes)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&tmp_path, &path));

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_error(&path, e));
        }
        Ok(())
    }

    fn entry_path(&self, id: UploadEntryId) -> PathBuf {
        self.directory.join(format!("{}.{}", id, ENTRY_EXTENSION))
    }

    fn remove_temp_files(&self) {
        let Ok(read_dir) = fs::read_dir(&self.directory) else {
            return;
        };
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TEMP_EXTENSION) {
                tracing::debug!(path = %path.display(), "Removing interrupted upload cache write");
                let _ = fs::remove_file(&path);
            }
        }
    }
}

fn encode(entry: &CacheEntry) -> io::Result<Vec<u8>> {
    let data_len = u32::try_from(entry.data.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Payload too large"))?;

    let mut checked = Vec::with_capacity(1 + 4 + 8 + 16 + 4 + entry.data.len());
    checked.write_u8(entry.payload_type.tag())?;
    checked.write_u32::<LittleEndian>(entry.attempt_count)?;
    checked.write_i64::<LittleEndian>(entry.created_at.timestamp_millis())?;
    checked.write_all(entry.id.as_uuid().as_bytes())?;
    checked.write_u32::<LittleEndian>(data_len)?;
    checked.write_all(&entry.data)?;

    let mut out = Vec::with_capacity(4 + 1 + 4 + checked.len());
    out.write_all(&MAGIC)?;
    out.write_u8(FORMAT_VERSION)?;
    out.write_u32::<LittleEndian>(crc32fast::hash(&checked))?;
    out.write_all(&checked)?;
    Ok(out)
}

fn decode(bytes: &[u8]) -> std::result::Result<CacheEntry, String> {
    let mut cursor = io::Cursor::new(bytes);
    let truncated = |e: io::Error| format!("Truncated entry: {}", e);

    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic).map_err(truncated)?;
    if magic != MAGIC {
        return Err("Bad magic".to_string());
    }
    let version = cursor.read_u8().map_err(truncated)?;
    if version != FORMAT_VERSION {
        return Err(format!("Unsupported format version {}", version));
    }
    let stored_crc = cursor.read_u32::<LittleEndian>().map_err(truncated)?;

    let checked = &bytes[cursor.position() as usize..];
    let computed_crc = crc32fast::hash(checked);
    if computed_crc != stored_crc {
        return Err(format!(
            "CRC mismatch: expected {}, got {}",
            stored_crc, computed_crc
        ));
    }

    let mut cursor = io::Cursor::new(checked);
    let tag = cursor.read_u8().map_err(truncated)?;
    let payload_type =
        PayloadType::from_tag(tag).ok_or_else(|| format!("Unknown payload type {}", tag))?;
    let attempt_count = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
    let created_ms = cursor.read_i64::<LittleEndian>().map_err(truncated)?;
    let mut id = [0u8; 16];
    cursor.read_exact(&mut id).map_err(truncated)?;
    let data_len = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let mut data = vec![0u8; data_len];
    cursor.read_exact(&mut data).map_err(truncated)?;

    let created_at = Utc
        .timestamp_millis_opt(created_ms)
        .single()
        .ok_or_else(|| format!("Invalid creation time {}", created_ms))?;

    Ok(CacheEntry {
        id: UploadEntryId::from_uuid(uuid::Uuid::from_bytes(id)),
        payload_type,
        data,
        attempt_count,
        created_at,
    })
}

fn io_error(path: &Path, e: io::Error) -> UploadError {
    UploadError::CacheIo {
        path: path.to_path_buf(),
        cause: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cache(dir: &Path) -> UploadCache {
        UploadCache::open(&CacheOptions::new(dir)).unwrap()
    }

    #[test]
    fn insert_fetch_delete() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());

        let entry = cache.insert(PayloadType::Session, b"{\"v\":15}".to_vec()).unwrap();
        let fetched = cache.fetch(entry.id).unwrap().unwrap();
        assert_eq!(fetched.data, entry.data);
        assert_eq!(fetched.payload_type, PayloadType::Session);
        assert_eq!(fetched.attempt_count, 0);
        assert_eq!(cache.len(), 1);

        assert!(cache.delete(entry.id).unwrap());
        assert!(!cache.delete(entry.id).unwrap());
        assert!(cache.fetch(entry.id).unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn attempts_persist() {
        let dir = tempdir().unwrap();
        let entry = {
            let cache = cache(dir.path());
            let entry = cache.insert(PayloadType::Blob, vec![1, 2, 3]).unwrap();
            assert_eq!(cache.record_failed_attempt(entry.id).unwrap(), Some(1));
            assert_eq!(cache.record_failed_attempt(entry.id).unwrap(), Some(2));
            entry
        };

        let reopened = cache(dir.path());
        let all = reopened.fetch_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, entry.id);
        assert_eq!(all[0].attempt_count, 2);
        assert_eq!(reopened.record_failed_attempt(UploadEntryId::new()).unwrap(), None);
    }

    #[test]
    fn damaged_entries_are_removed() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());
        let good = cache.insert(PayloadType::Session, b"good".to_vec()).unwrap();
        let bad = cache.insert(PayloadType::Session, b"bad".to_vec()).unwrap();

        let bad_path = dir.path().join(format!("{}.entry", bad.id));
        let mut bytes = fs::read(&bad_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&bad_path, bytes).unwrap();

        assert!(matches!(
            cache.fetch(bad.id),
            Err(UploadError::CacheCorruption { .. })
        ));

        let all = cache.fetch_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, good.id);
        assert!(!bad_path.exists());
    }

    #[test]
    fn unreadable_entries_are_kept() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());
        let good = cache.insert(PayloadType::Session, b"good".to_vec()).unwrap();

        let unreadable = dir.path().join(format!("{}.entry", UploadEntryId::new()));
        fs::create_dir(&unreadable).unwrap();

        let all = cache.fetch_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, good.id);
        assert!(unreadable.exists());
    }

    #[test]
    fn interrupted_writes_are_swept_on_open() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join("0000.entry.tmp");
        fs::write(&stale, b"partial").unwrap();

        let cache = cache(dir.path());
        assert!(!stale.exists());
        assert!(cache.fetch_all().unwrap().is_empty());
    }
}
