//! Content hashing (SHA-256): avatar ids, snapshot checksums.

use sha2::{Digest, Sha256};

use crate::limits::HASH_LENGTH;

/// Hash arbitrary data. Hosts use this to derive avatar file ids.
pub fn hash(data: &[u8]) -> [u8; HASH_LENGTH] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Verify data against an expected hash.
pub fn verify(data: &[u8], expected: &[u8; HASH_LENGTH]) -> bool {
    hash(data) == *expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verify_roundtrip() {
        let payload = b"avatar bytes";
        let digest = hash(payload);
        assert!(verify(payload, &digest));
    }

    #[test]
    fn verify_rejects_tampered() {
        let digest = hash(b"avatar bytes");
        assert!(!verify(b"tampered", &digest));
    }
}
