//! File persistence helpers shared by the ledger, queue, and schedule stores
//!
//! Whole-file writes go to a sibling temp file and are renamed into place, so a
//! process killed mid-write leaves either the old or the new contents.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::StorageError;

/// Write `bytes` to `path` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }

    let tmp_path = temp_path(path);
    let mut file = fs::File::create(&tmp_path).map_err(|e| StorageError::io(&tmp_path, e))?;
    file.write_all(bytes)
        .map_err(|e| StorageError::io(&tmp_path, e))?;
    file.sync_all().map_err(|e| StorageError::io(&tmp_path, e))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|e| StorageError::io(path, e))?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

/// Read a JSON document, degrading to `T::default()` when the file is missing,
/// empty, or unparseable. Only genuine I/O failures are returned.
pub fn read_json_or_default<T>(path: &Path) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
{
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(StorageError::io(path, e)),
    };

    if content.trim().is_empty() {
        return Ok(T::default());
    }

    match serde_json::from_str(&content) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt JSON file, using defaults");
            Ok(T::default())
        }
    }
}

/// Exclusive advisory lock on a data directory.
///
/// Held by every process that writes the ledger or queue, so a one-shot CLI
/// run cannot interleave with a running server. Released when dropped.
#[derive(Debug)]
pub struct DataDirLock {
    path: PathBuf,
    _file: fs::File,
}

impl DataDirLock {
    pub const FILE_NAME: &'static str = ".outreach.lock";

    /// Take the lock without blocking. Fails with [`StorageError::Locked`]
    /// while another holder exists.
    pub fn acquire(dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;

        let path = dir.join(Self::FILE_NAME);
        let file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;

        if let Err(e) = fs2::FileExt::try_lock_exclusive(&file) {
            return Err(if e.kind() == ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
            {
                StorageError::Locked {
                    path: path.display().to_string(),
                }
            } else {
                StorageError::io(&path, e)
            });
        }

        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
