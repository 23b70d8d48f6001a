//! Pluggable item hashing for Merkle leaves.

use sha2::{Digest as _, Sha256};

/// Stable hash over serialized item bytes.
///
/// Implementations must be deterministic: the same bytes always produce the
/// same digest. The null digest is a well-known constant substituted for
/// logically absent (reaped/placeholder) items; it is deliberately not the
/// hash of an empty byte string.
pub trait ItemHasher {
    /// Digest length in bytes.
    fn digest_len(&self) -> usize;

    /// Hash serialized item bytes.
    fn digest(&self, bytes: &[u8]) -> Vec<u8>;

    /// Hash the concatenation of two child digests (internal tree nodes).
    fn node_digest(&self, left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut joined = Vec::with_capacity(left.len() + right.len());
        joined.extend_from_slice(left);
        joined.extend_from_slice(right);
        self.digest(&joined)
    }

    /// The null/placeholder digest: all zeroes at `digest_len`.
    fn null_digest(&self) -> Vec<u8> {
        vec![0u8; self.digest_len()]
    }
}

/// SHA-256 item hasher (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ItemHasher for Sha256Hasher {
    fn digest_len(&self) -> usize {
        32
    }

    fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hasher.finalize().to_vec()
    }
}
