//! Foundation types for the synced file store.
//!
//! Every other `sfs` crate depends on `sfs-types`.
//!
//! # Key Types
//!
//! - [`Checksum`]: Content-derived storage key (`<digest hex>.<byte length>`)
//! - [`DomainTag`]: Reference namespace an owner belongs to
//! - [`OwnerKind`]: Whether an owner is local to this installation or supplied by sync
//! - [`OwnerKey`]: A single owner: kind, domain and identifier

pub mod checksum;
pub mod error;
pub mod owner;

pub use checksum::Checksum;
pub use error::TypeError;
pub use owner::{DomainTag, OwnerKey, OwnerKind};
