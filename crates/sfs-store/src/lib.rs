//! Content-addressed, reference-counted blob storage shared by local and
//! sync owners.
//!
//! Each blob is keyed by a [`Checksum`](sfs_types::Checksum) derived from
//! its bytes, so identical content is stored once no matter how many owners
//! point at it. An owner is a `(kind, domain, id)` triple: local owners are
//! things on this device that produced content, sync owners mirror remote
//! state and may reference content that has not arrived yet.
//!
//! # Layout
//!
//! - [`FileStore`]: cloneable async handle; one actor task owns all state.
//! - [`FileTable`]: the synchronous reference table behind the actor.
//! - [`DiskStore`]: blocking backing store, driven from a dedicated disk
//!   sequence ([`FsDiskStore`] for real directories, [`InMemoryDiskStore`]
//!   for tests and embedding).
//! - [`MetadataTable`]: the persisted reference table, saved with a debounce.
//!
//! # Rules
//!
//! 1. Content is written at most once per checksum while it stays on disk.
//! 2. A blob's file is deleted only after its last reference is released,
//!    and the record stays until the delete is confirmed.
//! 3. A record re-referenced while its delete is in flight survives it.
//! 4. Lookups never fail; unknown or absent content yields a placeholder.

pub mod config;
pub mod content;
pub mod disk;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod mime;
pub mod record;
pub mod store;
pub mod table;
pub mod worker;

// Re-export primary types at crate root for ergonomic imports.
pub use config::StoreConfig;
pub use content::{missing_placeholder, unknown_placeholder, FileContent, PLACEHOLDER_MIME_TYPE};
pub use disk::{DiskStore, FsDiskStore};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryDiskStore;
pub use metadata::{MetadataTable, PersistedFile, PersistedRef, METADATA_VERSION};
pub use record::FileRecord;
pub use store::FileStore;
pub use table::{FileSummary, FileTable, StoreStats};
