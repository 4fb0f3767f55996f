use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use sfs_types::Checksum;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// Blocking backing store for blob content and the metadata file.
///
/// Every call may block on I/O, so the [`crate::FileStore`] only ever calls
/// these from its background disk sequence. Implementations must satisfy:
/// - Blobs are flat: one entry per checksum, named by the checksum.
/// - A blob never appears under its name partially written.
/// - Deleting an absent blob is not an error.
pub trait DiskStore: Send + Sync {
    /// Read a blob. Returns [`StoreError::NotFound`] if it does not exist.
    fn read(&self, checksum: &Checksum) -> StoreResult<Bytes>;

    /// Write a blob, replacing any previous content under that checksum.
    fn write(&self, checksum: &Checksum, data: &[u8]) -> StoreResult<()>;

    /// Delete a blob. Returns `true` if it existed.
    fn delete(&self, checksum: &Checksum) -> StoreResult<bool>;

    /// List every blob currently stored.
    fn list(&self) -> StoreResult<Vec<Checksum>>;

    /// Read the metadata file. Returns `Ok(None)` if it was never written.
    fn read_metadata(&self) -> StoreResult<Option<Vec<u8>>>;

    /// Atomically replace the metadata file.
    fn write_metadata(&self, data: &[u8]) -> StoreResult<()>;
}

/// Filesystem store: `<root>/<blob_dir>/<checksum>` plus
/// `<root>/<metadata_file>`.
#[derive(Debug)]
pub struct FsDiskStore {
    blob_dir: PathBuf,
    metadata_path: PathBuf,
}

impl FsDiskStore {
    /// Open (or create) the store directories described by `config`.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let blob_dir = config.blob_path();
        fs::create_dir_all(&blob_dir)?;
        Ok(Self {
            blob_dir,
            metadata_path: config.metadata_path(),
        })
    }

    /// Path of the file backing `checksum`.
    pub fn path(&self, checksum: &Checksum) -> PathBuf {
        self.blob_dir.join(checksum.as_str())
    }

    pub fn blob_dir(&self) -> &Path {
        &self.blob_dir
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }
}

/// Write `data` next to `target` and rename it into place.
fn write_atomic(target: &Path, data: &[u8]) -> io::Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

impl DiskStore for FsDiskStore {
    fn read(&self, checksum: &Checksum) -> StoreResult<Bytes> {
        match fs::read(self.path(checksum)) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(checksum.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, checksum: &Checksum, data: &[u8]) -> StoreResult<()> {
        write_atomic(&self.path(checksum), data)?;
        Ok(())
    }

    fn delete(&self, checksum: &Checksum) -> StoreResult<bool> {
        match fs::remove_file(self.path(checksum)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> StoreResult<Vec<Checksum>> {
        let mut checksums = Vec::new();
        for entry in fs::read_dir(&self.blob_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().map(Checksum::parse) {
                Some(Ok(checksum)) => checksums.push(checksum),
                _ => debug!(name = ?name, "ignoring non-blob file in blob directory"),
            }
        }
        checksums.sort();
        Ok(checksums)
    }

    fn read_metadata(&self) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(&self.metadata_path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_metadata(&self, data: &[u8]) -> StoreResult<()> {
        write_atomic(&self.metadata_path, data)?;
        Ok(())
    }
}
