//! Tamper-evident positional list.
//!
//! Pairs a [`StreamList`] with a [`FlatMerkleTree`] whose leaf `i` is the
//! digest of item `i`'s serialized bytes. Every mutation updates the leaf
//! first, then the record bytes, then persists the tree snapshot into
//! reserved record 0, so a snapshot that decodes cleanly always describes
//! the byte stream it sits in.

use crate::collections::list::StreamList;
use crate::error::{Result, StorageError};
use crate::hash::ItemHasher;
use crate::merkle::tree::FlatMerkleTree;
use crate::serializer::ItemSerializer;
use crate::storage::ClusteredStorage;
use std::io::{Read, Seek, Write};

/// Directory slot holding the tree snapshot.
const SNAPSHOT_RECORD: usize = 0;

pub struct MerkleList<T, S, Ser, H>
where
    S: Read + Write + Seek,
    Ser: ItemSerializer<T>,
    H: ItemHasher,
{
    list: StreamList<T, S, Ser>,
    tree: FlatMerkleTree<H>,
}

impl<T, S, Ser, H> MerkleList<T, S, Ser, H>
where
    S: Read + Write + Seek,
    Ser: ItemSerializer<T>,
    H: ItemHasher,
{
    /// Initialize over freshly created storage and persist the empty tree.
    ///
    /// The storage must reserve at least one record for the snapshot and
    /// must not contain any items yet.
    pub fn create(storage: ClusteredStorage<S>, serializer: Ser, hasher: H) -> Result<Self> {
        Self::check_reserved(&storage)?;
        if storage.record_count() > storage.reserved_records() as usize {
            return Err(StorageError::PreconditionViolation(
                "merkle list must be created over empty storage",
            ));
        }
        let mut this = MerkleList {
            list: StreamList::new(storage, serializer),
            tree: FlatMerkleTree::new(hasher),
        };
        this.save_tree()?;
        Ok(this)
    }

    /// Reattach to reopened storage, decoding and re-verifying the
    /// persisted snapshot.
    pub fn load(storage: ClusteredStorage<S>, serializer: Ser, hasher: H) -> Result<Self> {
        Self::check_reserved(&storage)?;
        let mut list = StreamList::new(storage, serializer);
        let bytes = list.storage_mut().read_record(SNAPSHOT_RECORD)?;
        let tree = FlatMerkleTree::decode(&bytes, hasher)?;
        if tree.leaf_count() != list.len() {
            return Err(StorageError::CorruptStorage(format!(
                "merkle snapshot covers {} leaves but the list holds {} items",
                tree.leaf_count(),
                list.len()
            )));
        }
        Ok(MerkleList { list, tree })
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn add(&mut self, item: &T) -> Result<usize> {
        let bytes = self.list.serialize_item(item)?;
        let leaf = self.tree.hasher().digest(&bytes);
        self.tree.push_leaf(leaf)?;
        match self.list.add_raw(&bytes) {
            Ok(index) => {
                self.save_tree()?;
                Ok(index)
            }
            Err(err) => {
                // Put the tree back in step with the list.
                self.tree.remove_leaf(self.tree.leaf_count() - 1).ok();
                Err(err)
            }
        }
    }

    pub fn insert(&mut self, index: usize, item: &T) -> Result<()> {
        let bytes = self.list.serialize_item(item)?;
        let leaf = self.tree.hasher().digest(&bytes);
        self.tree.insert_leaf(index, leaf)?;
        if let Err(err) = self.list.insert_raw(index, &bytes) {
            self.tree.remove_leaf(index).ok();
            return Err(err);
        }
        self.save_tree()
    }

    pub fn update(&mut self, index: usize, item: &T) -> Result<()> {
        let bytes = self.list.serialize_item(item)?;
        let leaf = self.tree.hasher().digest(&bytes);
        let previous = self.tree.leaf(index)?.to_vec();
        self.tree.update_leaf(index, leaf)?;
        if let Err(err) = self.list.update_raw(index, &bytes) {
            self.tree.update_leaf(index, previous).ok();
            return Err(err);
        }
        self.save_tree()
    }

    pub fn remove_at(&mut self, index: usize) -> Result<()> {
        let removed = self.tree.remove_leaf(index)?;
        if let Err(err) = self.list.remove_at(index) {
            self.tree.insert_leaf(index, removed).ok();
            return Err(err);
        }
        self.save_tree()
    }

    pub fn get(&mut self, index: usize) -> Result<T> {
        self.list.get(index)
    }

    pub fn to_vec(&mut self) -> Result<Vec<T>> {
        self.list.to_vec()
    }

    /// Merkle root over all items.
    pub fn root(&mut self) -> Vec<u8> {
        self.tree.root()
    }

    /// Leaf digest of item `index`.
    pub fn leaf(&self, index: usize) -> Result<&[u8]> {
        self.tree.leaf(index)
    }

    /// Re-hash every stored item and check it against its leaf.
    pub fn verify(&mut self) -> Result<()> {
        for index in 0..self.list.len() {
            let bytes = self.list.get_raw(index)?;
            let digest = self.tree.hasher().digest(&bytes);
            if digest != self.tree.leaf(index)? {
                return Err(StorageError::CorruptStorage(format!(
                    "item {} does not match its merkle leaf",
                    index
                )));
            }
        }
        Ok(())
    }

    pub fn storage(&self) -> &ClusteredStorage<S> {
        self.list.storage()
    }

    pub fn into_storage(self) -> ClusteredStorage<S> {
        self.list.into_storage()
    }

    fn save_tree(&mut self) -> Result<()> {
        let bytes = self.tree.encode();
        let mut scope = self.list.storage_mut().enter_update_scope(SNAPSHOT_RECORD)?;
        scope.write_bytes(&bytes)?;
        scope.commit()?;
        Ok(())
    }

    fn check_reserved(storage: &ClusteredStorage<S>) -> Result<()> {
        if storage.reserved_records() == 0 {
            return Err(StorageError::PreconditionViolation(
                "merkle collections require at least one reserved record",
            ));
        }
        Ok(())
    }
}
