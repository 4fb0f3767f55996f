//! File content returned by [`crate::FileStore::get_file`], including the
//! built-in placeholder assets.

use bytes::Bytes;
use once_cell::sync::Lazy;

use crate::mime;

static UNKNOWN_FILE: Lazy<Bytes> =
    Lazy::new(|| Bytes::from_static(include_bytes!("../assets/unknown.svg")));

static MISSING_FILE: Lazy<Bytes> =
    Lazy::new(|| Bytes::from_static(include_bytes!("../assets/missing.svg")));

/// Result of a content lookup.
///
/// Lookups never fail: a checksum the store does not know yields
/// [`FileContent::Unknown`], and a known checksum whose bytes are not
/// available locally (sync metadata arrived before the content, or the
/// content could not be read) yields [`FileContent::Missing`]. Both carry a
/// built-in placeholder image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileContent {
    /// The blob's real bytes.
    Stored(Bytes),
    /// The checksum is not referenced by anyone.
    Unknown,
    /// The checksum is referenced but its bytes are not locally present.
    Missing,
}

impl FileContent {
    /// The bytes to display: the blob itself or the matching placeholder.
    pub fn bytes(&self) -> Bytes {
        match self {
            Self::Stored(data) => data.clone(),
            Self::Unknown => unknown_placeholder(),
            Self::Missing => missing_placeholder(),
        }
    }

    /// Whether this is one of the built-in placeholders.
    pub fn is_placeholder(&self) -> bool {
        !matches!(self, Self::Stored(_))
    }

    /// The stored bytes, if any.
    pub fn into_stored(self) -> Option<Bytes> {
        match self {
            Self::Stored(data) => Some(data),
            _ => None,
        }
    }
}

/// Placeholder served for unknown checksums.
pub fn unknown_placeholder() -> Bytes {
    UNKNOWN_FILE.clone()
}

/// Placeholder served for known checksums whose content is absent.
pub fn missing_placeholder() -> Bytes {
    MISSING_FILE.clone()
}

/// MIME type of both placeholders.
pub const PLACEHOLDER_MIME_TYPE: &str = mime::SVG;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_distinct_svgs() {
        let unknown = unknown_placeholder();
        let missing = missing_placeholder();
        assert_ne!(unknown, missing);
        assert_eq!(mime::sniff(&unknown), PLACEHOLDER_MIME_TYPE);
        assert_eq!(mime::sniff(&missing), PLACEHOLDER_MIME_TYPE);
    }

    #[test]
    fn placeholders_share_one_buffer() {
        let a = unknown_placeholder();
        let b = unknown_placeholder();
        assert_eq!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn bytes_selects_payload() {
        let stored = FileContent::Stored(Bytes::from_static(&[1, 2, 3]));
        assert_eq!(stored.bytes().as_ref(), &[1, 2, 3]);
        assert!(!stored.is_placeholder());
        assert_eq!(FileContent::Unknown.bytes(), unknown_placeholder());
        assert_eq!(FileContent::Missing.bytes(), missing_placeholder());
        assert!(FileContent::Missing.is_placeholder());
    }

    #[test]
    fn into_stored() {
        assert!(FileContent::Unknown.into_stored().is_none());
        let data = Bytes::from_static(b"x");
        assert_eq!(FileContent::Stored(data.clone()).into_stored(), Some(data));
    }
}
