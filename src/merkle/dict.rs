//! Tamper-evident dictionary.
//!
//! The tree carries one leaf per non-reserved directory slot, in slot
//! order. A live slot's leaf is the digest of its fixed-width key blob
//! concatenated with the serialized value; a reaped slot keeps the null
//! digest as a placeholder, so slot reuse never shifts other leaves.

use crate::collections::dict::StreamDict;
use crate::error::{Result, StorageError};
use crate::hash::ItemHasher;
use crate::merkle::tree::FlatMerkleTree;
use crate::serializer::ItemSerializer;
use crate::storage::ClusteredStorage;
use std::io::{Read, Seek, Write};

const SNAPSHOT_RECORD: usize = 0;

pub struct MerkleDict<K, V, S, KSer, VSer, H>
where
    S: Read + Write + Seek,
    KSer: ItemSerializer<K>,
    VSer: ItemSerializer<V>,
    H: ItemHasher,
{
    dict: StreamDict<K, V, S, KSer, VSer>,
    tree: FlatMerkleTree<H>,
}

impl<K, V, S, KSer, VSer, H> MerkleDict<K, V, S, KSer, VSer, H>
where
    S: Read + Write + Seek,
    KSer: ItemSerializer<K>,
    VSer: ItemSerializer<V>,
    H: ItemHasher,
{
    /// Initialize over freshly created storage and persist the empty tree.
    pub fn create(
        storage: ClusteredStorage<S>,
        key_serializer: KSer,
        value_serializer: VSer,
        hasher: H,
    ) -> Result<Self> {
        check_reserved(&storage)?;
        if storage.record_count() > storage.reserved_records() as usize {
            return Err(StorageError::PreconditionViolation(
                "merkle dictionary must be created over empty storage",
            ));
        }
        let mut this = MerkleDict {
            dict: StreamDict::new(storage, key_serializer, value_serializer)?,
            tree: FlatMerkleTree::new(hasher),
        };
        this.save_tree()?;
        Ok(this)
    }

    /// Reattach to reopened storage, decoding and re-verifying the
    /// persisted snapshot.
    pub fn load(
        storage: ClusteredStorage<S>,
        key_serializer: KSer,
        value_serializer: VSer,
        hasher: H,
    ) -> Result<Self> {
        check_reserved(&storage)?;
        let mut dict = StreamDict::new(storage, key_serializer, value_serializer)?;
        let bytes = dict.storage_mut().read_record(SNAPSHOT_RECORD)?;
        let tree = FlatMerkleTree::decode(&bytes, hasher)?;
        let slots = dict.storage().record_count() - dict.reserved();
        if tree.leaf_count() != slots {
            return Err(StorageError::CorruptStorage(format!(
                "merkle snapshot covers {} leaves but the dictionary holds {} slots",
                tree.leaf_count(),
                slots
            )));
        }
        Ok(MerkleDict { dict, tree })
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// Insert or replace. Returns whether an existing value was replaced.
    pub fn insert(&mut self, key: &K, value: &V) -> Result<bool> {
        let leaf = self.entry_leaf(key, value)?;
        let reserved = self.dict.reserved();
        let slot = match self.dict.slot_for_key(key)? {
            Some(slot) => slot,
            None => self.dict.next_free_slot(),
        };
        let leaf_index = slot - reserved;
        let previous = if leaf_index < self.tree.leaf_count() {
            // Existing entry, or a reaped slot's null placeholder.
            let previous = self.tree.leaf(leaf_index)?.to_vec();
            self.tree.update_leaf(leaf_index, leaf)?;
            Some(previous)
        } else {
            self.tree.push_leaf(leaf)?;
            None
        };
        match self.dict.insert_full(key, value) {
            Ok((_, replaced)) => {
                self.save_tree()?;
                Ok(replaced)
            }
            Err(err) => {
                // Put the tree back in step with the directory.
                match previous {
                    Some(previous) => {
                        self.tree.update_leaf(leaf_index, previous).ok();
                    }
                    None => {
                        self.tree.remove_leaf(leaf_index).ok();
                    }
                }
                Err(err)
            }
        }
    }

    pub fn get(&mut self, key: &K) -> Result<Option<V>> {
        self.dict.get(key)
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.dict.contains_key(key)
    }

    /// Remove a key. Its slot is reaped and its leaf reverts to the null
    /// placeholder.
    pub fn remove(&mut self, key: &K) -> Result<bool> {
        let slot = match self.dict.slot_for_key(key)? {
            Some(slot) => slot,
            None => return Ok(false),
        };
        let leaf_index = slot - self.dict.reserved();
        let previous = self.tree.leaf(leaf_index)?.to_vec();
        let null = self.tree.hasher().null_digest();
        self.tree.update_leaf(leaf_index, null)?;
        if let Err(err) = self.dict.storage_mut().reap_record(slot) {
            self.tree.update_leaf(leaf_index, previous).ok();
            return Err(err);
        }
        self.save_tree()?;
        Ok(true)
    }

    pub fn to_vec(&mut self) -> Result<Vec<(K, V)>> {
        self.dict.to_vec()
    }

    /// Merkle root over all slots.
    pub fn root(&mut self) -> Vec<u8> {
        self.tree.root()
    }

    /// Re-hash every slot's stored key and value and check them against the
    /// tree. Reaped slots must carry the null placeholder.
    pub fn verify(&mut self) -> Result<()> {
        let reserved = self.dict.reserved();
        let null = self.tree.hasher().null_digest();
        for slot in reserved..self.dict.storage().record_count() {
            let leaf_index = slot - reserved;
            let expected = if self.dict.storage().record_entry(slot)?.is_live() {
                let key = self.dict.storage().record_key(slot)?;
                let value = self.dict.storage_mut().read_record(slot)?;
                let mut joined = key;
                joined.extend_from_slice(&value);
                self.tree.hasher().digest(&joined)
            } else {
                null.clone()
            };
            if expected != self.tree.leaf(leaf_index)? {
                return Err(StorageError::CorruptStorage(format!(
                    "slot {} does not match its merkle leaf",
                    slot
                )));
            }
        }
        Ok(())
    }

    pub fn storage(&self) -> &ClusteredStorage<S> {
        self.dict.storage()
    }

    pub fn into_storage(self) -> ClusteredStorage<S> {
        self.dict.into_storage()
    }

    /// Leaf preimage: the key blob padded to the directory's fixed key
    /// width, followed by the serialized value. Matches what `verify` reads
    /// back out of the directory.
    fn entry_leaf(&self, key: &K, value: &V) -> Result<Vec<u8>> {
        let key_size = self.dict.storage().key_size() as usize;
        let mut joined = self.dict.key_blob(key)?;
        joined.resize(key_size, 0);
        joined.extend_from_slice(&self.dict.value_bytes(value)?);
        Ok(self.tree.hasher().digest(&joined))
    }

    fn save_tree(&mut self) -> Result<()> {
        let bytes = self.tree.encode();
        let mut scope = self.dict.storage_mut().enter_update_scope(SNAPSHOT_RECORD)?;
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
