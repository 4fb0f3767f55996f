//! Persisted reference metadata and debounced saving.
//!
//! The metadata file records, per checksum, which local and sync owners
//! reference it (plus the sniffed MIME type). Blob bytes live in the blob
//! directory; the metadata file never carries content.
//!
//! On-disk format (JSON):
//! ```text
//! {
//!   "version": 1,
//!   "files": [
//!     {
//!       "checksum": "<hex>.<len>",
//!       "mime_type": "image/png",
//!       "local": [{ "domain": "thumbnail", "owner": "node-1" }],
//!       "sync":  [{ "domain": "thumbnail", "owner": "guid-7" }]
//!     }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use sfs_types::{Checksum, DomainTag, OwnerKey, OwnerKind};
use tokio::time::{Duration, Instant};
use tracing::warn;

use crate::error::{StoreError, StoreResult};

/// Current metadata format version.
pub const METADATA_VERSION: u32 = 1;

/// One `(domain, owner id)` pair inside a persisted file entry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersistedRef {
    pub domain: DomainTag,
    pub owner: String,
}

/// Reference state of one blob as stored in the metadata file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedFile {
    pub checksum: Checksum,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub local: Vec<PersistedRef>,
    #[serde(default)]
    pub sync: Vec<PersistedRef>,
}

impl PersistedFile {
    pub fn new(checksum: Checksum) -> Self {
        Self {
            checksum,
            mime_type: None,
            local: Vec::new(),
            sync: Vec::new(),
        }
    }

    /// Every owner recorded for this file, local first.
    pub fn owners(&self) -> impl Iterator<Item = OwnerKey> + '_ {
        let local = self
            .local
            .iter()
            .map(|r| OwnerKey::new(OwnerKind::Local, r.domain.clone(), r.owner.clone()));
        let sync = self
            .sync
            .iter()
            .map(|r| OwnerKey::new(OwnerKind::Sync, r.domain.clone(), r.owner.clone()));
        local.chain(sync)
    }

    /// Record `owner` under the list matching its kind.
    pub fn push_owner(&mut self, owner: &OwnerKey) {
        let entry = PersistedRef {
            domain: owner.domain.clone(),
            owner: owner.id.clone(),
        };
        match owner.kind {
            OwnerKind::Local => self.local.push(entry),
            OwnerKind::Sync => self.sync.push(entry),
        }
    }
}

/// The full persisted reference table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataTable {
    pub version: u32,
    pub files: Vec<PersistedFile>,
}

impl Default for MetadataTable {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION,
            files: Vec::new(),
        }
    }
}

impl MetadataTable {
    pub fn new(files: Vec<PersistedFile>) -> Self {
        Self {
            version: METADATA_VERSION,
            files,
        }
    }

    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> StoreResult<Self> {
        let table: Self =
            serde_json::from_slice(data).map_err(|e| StoreError::Serialization(e.to_string()))?;
        if table.version != METADATA_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: table.version,
                expected: METADATA_VERSION,
            });
        }
        Ok(table)
    }

    /// Decode persisted metadata, treating absent or unusable data as an
    /// empty table.
    pub fn decode_or_empty(data: Option<&[u8]>) -> Self {
        let Some(data) = data else {
            return Self::default();
        };
        match Self::decode(data) {
            Ok(table) => table,
            Err(e) => {
                warn!(error = %e, "discarding unreadable file store metadata");
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Debounce timer for metadata saves.
///
/// The first mutation arms a deadline `delay` in the future; mutations that
/// arrive while armed fold into the same save. The owner fires the save once
/// the deadline passes and calls [`SaveScheduler::take`] to disarm.
#[derive(Debug)]
pub struct SaveScheduler {
    delay: Duration,
    deadline: Option<Instant>,
}

impl SaveScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Arm the timer unless already armed. Returns `true` if newly armed.
    pub fn schedule(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.delay);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm. Returns `true` if a save was pending.
    pub fn take(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}
