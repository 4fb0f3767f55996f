use sfs_types::{Checksum, TypeError};

/// Errors from the disk backing store, metadata persistence and
/// configuration.
///
/// None of these reach callers of the [`crate::FileStore`] API: the store
/// absorbs them and answers with placeholders instead. They surface only
/// from the backing-store traits and from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested blob is not on disk.
    #[error("blob not found: {0}")]
    NotFound(Checksum),

    /// Content read back from disk does not match its checksum.
    #[error("hash mismatch for {checksum}: read {actual_len} bytes that do not hash to the key")]
    HashMismatch { checksum: Checksum, actual_len: u64 },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The metadata file was written by an incompatible version.
    #[error("unsupported metadata version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Type(#[from] TypeError),
}

impl StoreError {
    /// Whether the blob is definitely absent or unusable on disk, as opposed
    /// to a transient I/O failure.
    pub fn is_content_gone(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::HashMismatch { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
