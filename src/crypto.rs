//! Hash primitive for block digests
//!
//! SHA-256 over an arbitrary byte sequence, returned as a [`Digest`].

use crate::types::{Difficulty, Digest};
use sha2::{Digest as _, Sha256};

/// Hash data and return the digest
pub fn hash(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Digest::new(hasher.finalize().into())
}

/// Check whether a digest has at least `min_difficulty` leading zero bits
pub fn meets_difficulty(digest: &Digest, min_difficulty: Difficulty) -> bool {
    digest.leading_zero_bits() >= min_difficulty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_known_vector() {
        // SHA-256("abc")
        let digest = hash(b"abc");
        assert_eq!(
            digest.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash(b"test data"), hash(b"test data"));
        assert_ne!(hash(b"test data"), hash(b"different data"));
    }

    #[test]
    fn test_meets_difficulty() {
        let mut bytes = [0xffu8; 32];
        bytes[0] = 0;
        bytes[1] = 0x0f;
        let digest = Digest::new(bytes);
        assert_eq!(digest.leading_zero_bits(), 12);
        assert!(meets_difficulty(&digest, 0));
        assert!(meets_difficulty(&digest, 12));
        assert!(!meets_difficulty(&digest, 13));
    }
}
