//! Backup storage for pending events
//!
//! The buffer writes the whole pending batch through a [`BackupStore`] after
//! every tracked event and deletes it once the collector confirms delivery.
//! [`FileStore`] is the default, [`MemoryStore`] keeps bytes in memory for
//! hosts without a writable directory and for tests.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Single named resource holding the encoded pending batch
pub trait BackupStore: Send + Sync {
    /// Replace the stored bytes
    fn write_all(&self, bytes: &[u8]) -> Result<()>;

    /// Read the stored bytes
    fn read_all(&self) -> Result<Vec<u8>>;

    /// Whether anything is stored
    fn exists(&self) -> bool;

    /// Remove the stored bytes. Deleting a missing resource is not an error.
    fn delete(&self) -> Result<()>;

    /// Move undecodable bytes out of the way so the next write does not
    /// clobber them. Defaults to [`delete`](Self::delete).
    fn quarantine(&self) -> Result<()> {
        self.delete()
    }
}

/// Backup kept in one file on disk
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make a rename or removal in the backup directory durable
    fn sync_parent(&self) -> Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fsync_dir(parent),
            _ => fsync_dir(Path::new(".")),
        }
    }

    /// `<path><suffix>`, e.g. `BackupEvents.json.tmp`
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }
}

impl BackupStore for FileStore {
    fn write_all(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Temp file is synced before the rename and the directory after it,
        // so the backup is either the old batch or the new one, never empty
        let tmp = self.sibling(".tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp, &self.path)?;
        self.sync_parent()
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(&self.path)?)
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => self.sync_parent(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn quarantine(&self) -> Result<()> {
        let target = self.sibling(".corrupt");
        std::fs::rename(&self.path, &target).map_err(|e| {
            Error::Backup(format!(
                "failed to move {} to {}: {}",
                self.path.display(),
                target.display(),
                e
            ))
        })?;
        tracing::warn!(path = %target.display(), "Quarantined unreadable event backup");
        Ok(())
    }
}

/// fsync a directory so entries created, renamed or removed in it survive power loss
#[cfg(unix)]
fn fsync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Directories cannot be opened as files on this platform; rename durability
/// is left to the filesystem
#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// In-memory backup
#[derive(Debug, Default)]
pub struct MemoryStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `bytes`, as if written by an earlier process
    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes.into())),
        }
    }

    /// Snapshot of the stored bytes
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<u8>>> {
        // A panicked writer cannot leave partial bytes behind, so poison is harmless
        self.bytes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BackupStore for MemoryStore {
    fn write_all(&self, bytes: &[u8]) -> Result<()> {
        *self.lock() = Some(bytes.to_vec());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        self.lock()
            .clone()
            .ok_or_else(|| Error::Backup("no backup stored".to_string()))
    }

    fn exists(&self) -> bool {
        self.lock().is_some()
    }

    fn delete(&self) -> Result<()> {
        *self.lock() = None;
        Ok(())
    }
}
