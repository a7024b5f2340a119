//! Directory-backed storage: one file per key, written via `.part` + hard link.

use super::{temp_path, Storage, StorageError};
use crate::model::StorageKey;
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct FsStorage {
    dir: PathBuf,
}

impl FsStorage {
    /// Storage rooted at `dir`. The directory must exist; see [`FsStorage::prepare`].
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create `dir` (and parents) and return storage rooted there.
    pub fn prepare(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path for `key`. Keys are single path components.
    pub fn path_for(&self, key: &StorageKey) -> Result<PathBuf, StorageError> {
        let k = key.as_str();
        let bad = k.is_empty()
            || k == "."
            || k == ".."
            || k.contains(['/', '\\', '\0']);
        if bad {
            return Err(StorageError::InvalidKey(k.to_string()));
        }
        Ok(self.dir.join(k))
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn save(
        &self,
        key: &StorageKey,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<PathBuf, StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let final_path = self.path_for(key)?;
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || write_atomic(&final_path, &data).map(|()| final_path))
            .await
            .map_err(|e| StorageError::Other(format!("storage task: {}", e)))?
    }
}

/// Writes `data` to `<final>.part`, syncs, then links it in as `final`.
/// Never replaces an existing `final`. Removes the temp file on any failure.
fn write_atomic(final_path: &Path, data: &[u8]) -> Result<(), StorageError> {
    if final_path.exists() {
        return Err(StorageError::Exists(final_path.to_path_buf()));
    }
    let tmp = temp_path(final_path);
    let result = write_then_link(&tmp, final_path, data);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_then_link(tmp: &Path, final_path: &Path, data: &[u8]) -> Result<(), StorageError> {
    // create_new: a concurrent writer of the same key fails here instead of interleaving.
    let mut file = File::options()
        .write(true)
        .create_new(true)
        .open(tmp)
        .map_err(io_err(tmp))?;
    file.write_all(data).map_err(io_err(tmp))?;
    file.sync_all().map_err(io_err(tmp))?;
    drop(file);
    // hard_link fails if the target exists; rename would replace it.
    match fs::hard_link(tmp, final_path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(StorageError::Exists(final_path.to_path_buf()));
        }
        Err(e) => return Err(io_err(final_path)(e)),
    }
    if let Err(e) = fs::remove_file(tmp) {
        tracing::warn!(path = %tmp.display(), error = %e, "could not remove temp file");
    }
    Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StorageError {
    let path = path.to_path_buf();
    move |source| StorageError::Io { path, source }
}
