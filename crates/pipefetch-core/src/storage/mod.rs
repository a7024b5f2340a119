//! Persisting payloads and naming them.
//!
//! [`Storage`] writes one named payload; [`FsStorage`] is the default
//! directory-backed implementation (temp file + hard link, no overwrite). Names come
//! from an injectable [`KeyGenerator`].

mod fs;
mod keys;

pub use fs::FsStorage;
pub use keys::{KeyGenerator, SequentialKeys};

use crate::model::StorageKey;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Temporary file suffix used until the file is linked into place.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `a.txt` → `a.txt.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("refusing to overwrite existing {0}")]
    Exists(PathBuf),
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("save cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// Durable sink for payloads. Returns where the payload ended up.
///
/// A save that observes `cancel` before it starts writing must not leave
/// anything behind; once writing has begun it completes or cleans up.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save(
        &self,
        key: &StorageKey,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<PathBuf, StorageError>;
}
