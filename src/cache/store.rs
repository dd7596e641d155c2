//! On-disk storage of rendered responses.
//!
//! One file per cache key in a single flat directory. Writes go through a
//! temporary file in the same directory followed by a rename, so readers only
//! ever see complete files.

use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use bytes::Bytes;
use tracing::debug;

use super::error::CacheError;
use super::keys::CacheKey;

const PARTIAL_PREFIX: &str = ".partial-";

/// A cache file read back from disk.
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub body: Bytes,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open the store, creating `root` when missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| CacheError::CreateDir {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Modification time of the entry, or `None` when it does not exist.
    pub async fn modified(&self, key: &CacheKey) -> Result<Option<SystemTime>, CacheError> {
        match tokio::fs::metadata(self.path(key)).await {
            Ok(meta) => meta.modified().map(Some).map_err(CacheError::Read),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheError::Read(err)),
        }
    }

    pub async fn read(&self, key: &CacheKey) -> Result<CachedFile, CacheError> {
        let path = self.path(key);
        let body = tokio::fs::read(&path).await.map_err(CacheError::Read)?;
        let modified = tokio::fs::metadata(&path)
            .await
            .and_then(|meta| meta.modified())
            .map_err(CacheError::Read)?;
        Ok(CachedFile {
            body: Bytes::from(body),
            modified,
        })
    }

    /// Replace the entry for `key` with `body`.
    pub async fn write(&self, key: &CacheKey, body: Bytes) -> Result<(), CacheError> {
        let root = self.root.clone();
        let path = self.path(key);

        tokio::task::spawn_blocking(move || write_atomic(&root, &path, &body))
            .await
            .map_err(|err| CacheError::Task(err.to_string()))?
            .map_err(CacheError::Write)?;

        debug!(
            target = "feedfilter::cache::store",
            cache_key = %key,
            "cache file written"
        );
        Ok(())
    }

    /// Delete the entry for `key`; a missing file is not an error.
    pub async fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::Remove(err)),
        }
    }
}

fn write_atomic(root: &Path, path: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .tempfile_in(root)?;
    file.write_all(body)?;
    file.flush()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}
