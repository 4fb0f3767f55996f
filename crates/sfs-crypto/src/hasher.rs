use sfs_types::Checksum;

/// Domain-separated BLAKE3 content hasher.
///
/// The domain tag is prepended to every hash computation, so checksums
/// produced here never coincide with digests of the same bytes computed for
/// an unrelated purpose. Every installation must use the same hasher for a
/// given blob kind, otherwise sync peers would disagree on checksums.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for stored blobs.
    pub const BLOB: Self = Self {
        domain: "sfs-blob-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Derive the storage checksum of `data`.
    pub fn checksum(&self, data: &[u8]) -> Checksum {
        let digest = self.digest(data);
        let mut prefix = [0u8; Checksum::DIGEST_PREFIX_LEN];
        prefix.copy_from_slice(&digest[..Checksum::DIGEST_PREFIX_LEN]);
        Checksum::from_digest_prefix(prefix, data.len() as u64)
    }

    /// Full 32-byte domain-separated digest.
    pub fn digest(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        *hasher.finalize().as_bytes()
    }

    /// Verify that data produces the expected checksum.
    pub fn verify(&self, data: &[u8], expected: &Checksum) -> bool {
        expected.size() == data.len() as u64 && self.checksum(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic() {
        let data = b"hello world";
        assert_eq!(ContentHasher::BLOB.checksum(data), ContentHasher::BLOB.checksum(data));
    }

    #[test]
    fn checksum_encodes_length() {
        let c = ContentHasher::BLOB.checksum(&[0x01, 0x02, 0x03]);
        assert_eq!(c.size(), 3);
        assert!(c.as_str().ends_with(".3"));
        assert_eq!(c.as_str().len(), Checksum::DIGEST_PREFIX_LEN * 2 + 2);
    }

    #[test]
    fn checksum_is_filename_safe() {
        let c = ContentHasher::BLOB.checksum(b"thumbnail bytes");
        assert!(c
            .as_str()
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b) || b == b'.'));
        assert_eq!(c.as_str(), c.as_str().to_ascii_lowercase());
    }

    #[test]
    fn different_content_produces_different_checksums() {
        let a = ContentHasher::BLOB.checksum(b"aaa");
        let b = ContentHasher::BLOB.checksum(b"bbb");
        assert_ne!(a, b);
    }

    #[test]
    fn empty_content_has_checksum() {
        let c = ContentHasher::BLOB.checksum(b"");
        assert_eq!(c.size(), 0);
    }

    #[test]
    fn checksum_parses_back() {
        let c = ContentHasher::BLOB.checksum(b"round");
        assert_eq!(Checksum::parse(c.as_str()).unwrap(), c);
    }

    #[test]
    fn verify_correct_data() {
        let c = ContentHasher::BLOB.checksum(b"test data");
        assert!(ContentHasher::BLOB.verify(b"test data", &c));
    }

    #[test]
    fn verify_incorrect_data() {
        let c = ContentHasher::BLOB.checksum(b"original");
        assert!(!ContentHasher::BLOB.verify(b"tampered", &c));
    }

    #[test]
    fn custom_domain() {
        let hasher = ContentHasher::new("my-custom-domain-v1");
        assert_ne!(hasher.checksum(b"data"), ContentHasher::BLOB.checksum(b"data"));
        assert_eq!(hasher.domain(), "my-custom-domain-v1");
    }
}
