//! Durable device identifier.

use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use vigil_core::{Result, VigilError};

/// Get-or-create store for the device identifier.
///
/// The first call generates a random identifier and persists it; every later
/// call, in this process or the next, returns the same value.
pub trait DeviceIdStore: Send + Sync {
    /// The device identifier, created on first access.
    fn device_id(&self) -> Result<String>;
}

fn generate() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}

fn is_valid(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// Device id persisted in a single file.
#[derive(Debug)]
pub struct FileDeviceIdStore {
    path: PathBuf,
    cached: Mutex<Option<String>>,
}

impl FileDeviceIdStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let id = raw.trim().to_string();
                if is_valid(&id) {
                    Ok(Some(id))
                } else {
                    tracing::warn!(path = %self.path.display(), "Stored device id is invalid, regenerating");
                    Ok(None)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn persist(&self, id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, id).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }

    fn io_error(&self, e: io::Error) -> VigilError {
        VigilError::Io {
            path: self.path.clone(),
            cause: e.to_string(),
        }
    }
}

impl DeviceIdStore for FileDeviceIdStore {
    fn device_id(&self) -> Result<String> {
        let mut cached = self.cached.lock();
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let id = match self.load()? {
            Some(id) => id,
            None => {
                let id = generate();
                self.persist(&id)?;
                tracing::info!(path = %self.path.display(), "Generated new device id");
                id
            }
        };
        *cached = Some(id.clone());
        Ok(id)
    }
}

/// Device id held in memory for the lifetime of the store.
#[derive(Debug, Default)]
pub struct MemoryDeviceIdStore {
    id: Mutex<Option<String>>,
}

impl MemoryDeviceIdStore {
    /// Store that generates an id on first access.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that always returns `id`.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Mutex::new(Some(id.into())),
        }
    }
}

impl DeviceIdStore for MemoryDeviceIdStore {
    fn device_id(&self) -> Result<String> {
        Ok(self.id.lock().get_or_insert_with(generate).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_store_is_stable_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("device_id");

        let first = FileDeviceIdStore::new(&path).device_id().unwrap();
        assert_eq!(first.len(), 32);
        assert!(is_valid(&first));

        let store = FileDeviceIdStore::new(&path);
        assert_eq!(store.device_id().unwrap(), first);
        assert_eq!(store.device_id().unwrap(), first);
    }

    #[test]
    fn invalid_file_is_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device_id");
        fs::write(&path, "not-a-device-id").unwrap();

        let id = FileDeviceIdStore::new(&path).device_id().unwrap();
        assert!(is_valid(&id));
        assert_eq!(fs::read_to_string(&path).unwrap(), id);
    }

    #[test]
    fn memory_store_generates_once() {
        let store = MemoryDeviceIdStore::new();
        let id = store.device_id().unwrap();
        assert_eq!(store.device_id().unwrap(), id);

        let fixed = MemoryDeviceIdStore::with_id("ABCDEF");
        assert_eq!(fixed.device_id().unwrap(), "ABCDEF");
    }
}
