//! Tamper-evident hash set.
//!
//! One leaf per non-reserved directory slot, in slot order. A live slot's
//! leaf is the member's digest, which is also its directory key, so the
//! tree commits to exactly the membership the directory indexes. Reaped
//! slots keep the null placeholder.

use crate::collections::set::StreamSet;
use crate::error::{Result, StorageError};
use crate::hash::ItemHasher;
use crate::merkle::tree::FlatMerkleTree;
use crate::serializer::ItemSerializer;
use crate::storage::ClusteredStorage;
use std::io::{Read, Seek, Write};

const SNAPSHOT_RECORD: usize = 0;

pub struct MerkleSet<T, S, Ser, H>
where
    S: Read + Write + Seek,
    Ser: ItemSerializer<T>,
    H: ItemHasher,
{
    set: StreamSet<T, S, Ser, H>,
    tree: FlatMerkleTree<H>,
}

impl<T, S, Ser, H> MerkleSet<T, S, Ser, H>
where
    S: Read + Write + Seek,
    Ser: ItemSerializer<T>,
    H: ItemHasher + Clone,
{
    /// Initialize over freshly created storage and persist the empty tree.
    pub fn create(storage: ClusteredStorage<S>, serializer: Ser, hasher: H) -> Result<Self> {
        check_reserved(&storage)?;
        if storage.record_count() > storage.reserved_records() as usize {
            return Err(StorageError::PreconditionViolation(
                "merkle set must be created over empty storage",
            ));
        }
        let tree = FlatMerkleTree::new(hasher.clone());
        let mut this = MerkleSet {
            set: StreamSet::new(storage, serializer, hasher)?,
            tree,
        };
        this.save_tree()?;
        Ok(this)
    }

    /// Reattach to reopened storage, decoding and re-verifying the
    /// persisted snapshot.
    pub fn load(storage: ClusteredStorage<S>, serializer: Ser, hasher: H) -> Result<Self> {
        check_reserved(&storage)?;
        let mut set = StreamSet::new(storage, serializer, hasher.clone())?;
        let bytes = set.storage_mut().read_record(SNAPSHOT_RECORD)?;
        let tree = FlatMerkleTree::decode(&bytes, hasher)?;
        let slots = set.storage().record_count() - set.reserved();
        if tree.leaf_count() != slots {
            return Err(StorageError::CorruptStorage(format!(
                "merkle snapshot covers {} leaves but the set holds {} slots",
                tree.leaf_count(),
                slots
            )));
        }
        Ok(MerkleSet { set, tree })
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Insert an item. Returns `false` if an equal item was already present.
    pub fn insert(&mut self, item: &T) -> Result<bool> {
        let digest = self.set.item_digest(item)?;
        if self.set.slot_for(item)?.is_some() {
            return Ok(false);
        }
        let leaf_index = self.set.next_free_slot() - self.set.reserved();
        let previous = if leaf_index < self.tree.leaf_count() {
            // Reusing a reaped slot: replace its null placeholder.
            let previous = self.tree.leaf(leaf_index)?.to_vec();
            self.tree.update_leaf(leaf_index, digest)?;
            Some(previous)
        } else {
            self.tree.push_leaf(digest)?;
            None
        };
        if let Err(err) = self.set.insert_full(item) {
            // Put the tree back in step with the directory.
            match previous {
                Some(previous) => {
                    self.tree.update_leaf(leaf_index, previous).ok();
                }
                None => {
                    self.tree.remove_leaf(leaf_index).ok();
                }
            }
            return Err(err);
        }
        self.save_tree()?;
        Ok(true)
    }

    pub fn contains(&self, item: &T) -> Result<bool> {
        self.set.contains(item)
    }

    /// Remove an item. Its slot is reaped and its leaf reverts to the null
    /// placeholder.
    pub fn remove(&mut self, item: &T) -> Result<bool> {
        let slot = match self.set.slot_for(item)? {
            Some(slot) => slot,
            None => return Ok(false),
        };
        let leaf_index = slot - self.set.reserved();
        let previous = self.tree.leaf(leaf_index)?.to_vec();
        let null = self.tree.hasher().null_digest();
        self.tree.update_leaf(leaf_index, null)?;
        if let Err(err) = self.set.storage_mut().reap_record(slot) {
            self.tree.update_leaf(leaf_index, previous).ok();
            return Err(err);
        }
        self.save_tree()?;
        Ok(true)
    }

    pub fn to_vec(&mut self) -> Result<Vec<T>> {
        self.set.to_vec()
    }

    /// Merkle root over all slots.
    pub fn root(&mut self) -> Vec<u8> {
        self.tree.root()
    }

    /// Check every slot's directory key against the tree. Reaped slots must
    /// carry the null placeholder.
    pub fn verify(&mut self) -> Result<()> {
        let reserved = self.set.reserved();
        let null = self.tree.hasher().null_digest();
        for slot in reserved..self.set.storage().record_count() {
            let expected = if self.set.storage().record_entry(slot)?.is_live() {
                self.set.storage().record_key(slot)?
            } else {
                null.clone()
            };
            if expected != self.tree.leaf(slot - reserved)? {
                return Err(StorageError::CorruptStorage(format!(
                    "slot {} does not match its merkle leaf",
                    slot
                )));
            }
        }
        Ok(())
    }

    pub fn storage(&self) -> &ClusteredStorage<S> {
        self.set.storage()
    }

    pub fn into_storage(self) -> ClusteredStorage<S> {
        self.set.into_storage()
    }

    fn save_tree(&mut self) -> Result<()> {
        let bytes = self.tree.encode();
        let mut scope = self.set.storage_mut().enter_update_scope(SNAPSHOT_RECORD)?;
        scope.write_bytes(&bytes)?;
        scope.commit()?;
        Ok(())
    }
}

fn check_reserved<S: Read + Write + Seek>(storage: &ClusteredStorage<S>) -> Result<()> {
    if storage.reserved_records() == 0 {
        return Err(StorageError::PreconditionViolation(
            "merkle collections require at least one reserved record",
        ));
    }
    Ok(())
}
