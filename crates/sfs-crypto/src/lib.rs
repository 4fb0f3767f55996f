//! Content hashing for the synced file store.
//!
//! Derives [`sfs_types::Checksum`] keys from blob content with
//! domain-separated BLAKE3. No custom cryptography.

pub mod hasher;

pub use hasher::ContentHasher;
