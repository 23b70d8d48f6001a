//! Flat Merkle tree over an ordered leaf sequence.
//!
//! Leaves mirror collection items index-for-index. The root is a pure
//! function of the leaf sequence: levels are built by pairwise hashing,
//! promoting an odd trailing node unchanged. Root computation is lazy;
//! every leaf mutation marks the cached root dirty.

use crate::error::{Result, StorageError};
use crate::hash::ItemHasher;
use crate::varint::{decode_varint, encode_varint};

pub struct FlatMerkleTree<H: ItemHasher> {
    hasher: H,
    leaves: Vec<Vec<u8>>,
    cached_root: Option<Vec<u8>>,
}

impl<H: ItemHasher> FlatMerkleTree<H> {
    pub fn new(hasher: H) -> Self {
        FlatMerkleTree {
            hasher,
            leaves: Vec::new(),
            cached_root: None,
        }
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn leaf(&self, index: usize) -> Result<&[u8]> {
        self.leaves
            .get(index)
            .map(Vec::as_slice)
            .ok_or(StorageError::IndexOutOfBounds {
                index,
                len: self.leaves.len(),
            })
    }

    pub fn push_leaf(&mut self, digest: Vec<u8>) -> Result<()> {
        self.check_digest(&digest)?;
        self.leaves.push(digest);
        self.cached_root = None;
        Ok(())
    }

    pub fn insert_leaf(&mut self, index: usize, digest: Vec<u8>) -> Result<()> {
        self.check_digest(&digest)?;
        if index > self.leaves.len() {
            return Err(StorageError::IndexOutOfBounds {
                index,
                len: self.leaves.len(),
            });
        }
        self.leaves.insert(index, digest);
        self.cached_root = None;
        Ok(())
    }

    pub fn update_leaf(&mut self, index: usize, digest: Vec<u8>) -> Result<()> {
        self.check_digest(&digest)?;
        if index >= self.leaves.len() {
            return Err(StorageError::IndexOutOfBounds {
                index,
                len: self.leaves.len(),
            });
        }
        self.leaves[index] = digest;
        self.cached_root = None;
        Ok(())
    }

    pub fn remove_leaf(&mut self, index: usize) -> Result<Vec<u8>> {
        if index >= self.leaves.len() {
            return Err(StorageError::IndexOutOfBounds {
                index,
                len: self.leaves.len(),
            });
        }
        self.cached_root = None;
        Ok(self.leaves.remove(index))
    }

    /// Root over the current leaf sequence. The empty tree's root is the
    /// null digest.
    pub fn root(&mut self) -> Vec<u8> {
        if let Some(root) = &self.cached_root {
            return root.clone();
        }
        let root = Self::compute_root(&self.hasher, &self.leaves);
        self.cached_root = Some(root.clone());
        root
    }

    fn compute_root(hasher: &H, leaves: &[Vec<u8>]) -> Vec<u8> {
        if leaves.is_empty() {
            return hasher.null_digest();
        }
        let mut level: Vec<Vec<u8>> = leaves.to_vec();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                if pair.len() == 2 {
                    next.push(hasher.node_digest(&pair[0], &pair[1]));
                } else {
                    // Odd trailing node is promoted unchanged.
                    next.push(pair[0].clone());
                }
            }
            level = next;
        }
        level.pop().expect("non-empty level")
    }

    /// Snapshot layout: `[digest_len][leaf_count][leaves...][root]`, all
    /// lengths varint-encoded.
    pub fn encode(&mut self) -> Vec<u8> {
        let digest_len = self.hasher.digest_len();
        let mut buf = Vec::with_capacity(2 + (self.leaves.len() + 1) * digest_len);
        encode_varint(&mut buf, digest_len as u64);
        encode_varint(&mut buf, self.leaves.len() as u64);
        for leaf in &self.leaves {
            buf.extend_from_slice(leaf);
        }
        let root = self.root();
        buf.extend_from_slice(&root);
        buf
    }

    /// Decode a snapshot, re-deriving the root and cross-checking it
    /// against the stored root. A mismatch means the snapshot and the tree
    /// it describes diverged (e.g. a torn mutation) and is fatal.
    pub fn decode(bytes: &[u8], hasher: H) -> Result<Self> {
        let mut pos = 0;
        let digest_len = decode_varint(bytes, &mut pos)? as usize;
        if digest_len != hasher.digest_len() {
            return Err(StorageError::CorruptStorage(format!(
                "snapshot digest length {} does not match hasher ({})",
                digest_len,
                hasher.digest_len()
            )));
        }
        let leaf_count = decode_varint(bytes, &mut pos)? as usize;
        // leaf_count is decoder-controlled; the size math must not overflow.
        let needed = leaf_count
            .checked_add(1)
            .and_then(|n| n.checked_mul(digest_len))
            .and_then(|n| n.checked_add(pos))
            .ok_or_else(|| {
                StorageError::CorruptData(format!(
                    "merkle snapshot claims {} leaves",
                    leaf_count
                ))
            })?;
        if bytes.len() != needed {
            return Err(StorageError::CorruptData(format!(
                "merkle snapshot is {} bytes, expected {}",
                bytes.len(),
                needed
            )));
        }

        let mut leaves = Vec::with_capacity(leaf_count);
        for _ in 0..leaf_count {
            leaves.push(bytes[pos..pos + digest_len].to_vec());
            pos += digest_len;
        }
        let stored_root = &bytes[pos..pos + digest_len];

        let computed_root = Self::compute_root(&hasher, &leaves);
        if computed_root != stored_root {
            return Err(StorageError::CorruptStorage(
                "merkle snapshot root does not match its leaves".into(),
            ));
        }

        Ok(FlatMerkleTree {
            hasher,
            leaves,
            cached_root: Some(computed_root),
        })
    }

    fn check_digest(&self, digest: &[u8]) -> Result<()> {
        if digest.len() != self.hasher.digest_len() {
            return Err(StorageError::PreconditionViolation(
                "leaf digest length does not match the hasher",
            ));
        }
        Ok(())
    }
}
