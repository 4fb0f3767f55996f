use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Content-addressed storage key for a blob.
///
/// A `Checksum` is a fixed-length prefix of the content digest, hex encoded,
/// followed by `.` and the decimal byte length of the content:
///
/// ```text
/// 3f7a9c0e5b1d2a4c6e8f0a1b2c3d4e5f.2048
/// ```
///
/// Lowercase hex keeps the key valid as a filename on case-insensitive
/// filesystems. The length suffix makes the blob size available without
/// touching disk and further separates colliding digests. Identical content
/// always produces the same `Checksum`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum {
    repr: String,
    size: u64,
}

impl Checksum {
    /// Number of digest bytes kept in the key.
    pub const DIGEST_PREFIX_LEN: usize = 16;

    /// Build a checksum from an already truncated digest prefix.
    pub fn from_digest_prefix(prefix: [u8; Self::DIGEST_PREFIX_LEN], size: u64) -> Self {
        Self {
            repr: format!("{}.{size}", hex::encode(prefix)),
            size,
        }
    }

    /// Parse a checksum from its string form.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let malformed = |reason| TypeError::MalformedChecksum {
            value: s.to_string(),
            reason,
        };

        let (digest, size) = s.split_once('.').ok_or_else(|| malformed("missing length suffix"))?;
        if digest.len() != Self::DIGEST_PREFIX_LEN * 2 {
            return Err(malformed("wrong digest length"));
        }
        if !digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(malformed("digest is not lowercase hex"));
        }
        if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("length is not a decimal number"));
        }
        if size.len() > 1 && size.starts_with('0') {
            return Err(malformed("length has leading zeros"));
        }
        let size = size.parse::<u64>().map_err(|_| malformed("length out of range"))?;

        Ok(Self {
            repr: s.to_string(),
            size,
        })
    }

    /// Byte length of the content, taken from the key itself.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Short representation (first 8 digest characters).
    pub fn short(&self) -> &str {
        &self.repr[..8]
    }

    /// The full string form, also used as the on-disk filename.
    pub fn as_str(&self) -> &str {
        &self.repr
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({}..{})", self.short(), self.size)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl FromStr for Checksum {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Checksum {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Checksum> for String {
    fn from(checksum: Checksum) -> Self {
        checksum.repr
    }
}

impl AsRef<str> for Checksum {
    fn as_ref(&self) -> &str {
        &self.repr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Checksum {
        Checksum::from_digest_prefix([0xab; 16], 2048)
    }

    #[test]
    fn digest_prefix_layout() {
        let c = sample();
        assert_eq!(c.as_str(), format!("{}.2048", "ab".repeat(16)));
        assert_eq!(c.size(), 2048);
    }

    #[test]
    fn parse_accepts_own_output() {
        let c = sample();
        let parsed: Checksum = c.as_str().parse().unwrap();
        assert_eq!(parsed, c);
        assert_eq!(parsed.size(), 2048);
    }

    #[test]
    fn parse_rejects_malformed() {
        let digest = "0".repeat(32);
        for bad in [
            "".to_string(),
            digest.clone(),
            format!("{digest}."),
            format!("{digest}.-1"),
            format!("{digest}.12a"),
            format!("{digest}.012"),
            format!("{}.12", "A".repeat(32)),
            format!("{}.12", "0".repeat(31)),
            format!("{digest}.99999999999999999999999"),
        ] {
            assert!(
                matches!(Checksum::parse(&bad), Err(TypeError::MalformedChecksum { .. })),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn short_is_8_chars() {
        assert_eq!(sample().short(), "abababab");
    }

    #[test]
    fn display_is_full_form() {
        let c = sample();
        assert_eq!(format!("{c}"), c.as_str());
    }

    #[test]
    fn serde_as_plain_string() {
        let c = sample();
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, format!("\"{}\"", c.as_str()));
        let parsed: Checksum = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn serde_rejects_malformed_string() {
        assert!(serde_json::from_str::<Checksum>("\"not-a-checksum\"").is_err());
    }

    proptest! {
        #[test]
        fn size_survives_parse(prefix in any::<[u8; 16]>(), size in any::<u64>()) {
            let c = Checksum::from_digest_prefix(prefix, size);
            let parsed = Checksum::parse(c.as_str()).unwrap();
            prop_assert_eq!(parsed.size(), size);
            prop_assert_eq!(parsed, c);
        }
    }
}
