use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("malformed checksum {value:?}: {reason}")]
    MalformedChecksum { value: String, reason: &'static str },

    #[error("empty {0}")]
    Empty(&'static str),
}
