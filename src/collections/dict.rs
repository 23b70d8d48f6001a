//! Key-addressed dictionary over clustered storage.
//!
//! Keys are serialized into a length-prefixed blob stored in the record
//! directory's fixed-width key field, so lookups compare directory entries
//! without deserializing any value. Removal reaps (tombstones) the slot;
//! inserts reuse reaped slots before appending, so slot indices of live
//! entries never shift.

use crate::error::{Result, StorageError};
use crate::serializer::ItemSerializer;
use crate::storage::ClusteredStorage;
use crate::varint::{decode_varint, encode_varint};
use std::io::{Read, Seek, Write};
use std::marker::PhantomData;

pub struct StreamDict<K, V, S, KSer, VSer>
where
    S: Read + Write + Seek,
    KSer: ItemSerializer<K>,
    VSer: ItemSerializer<V>,
{
    storage: ClusteredStorage<S>,
    key_serializer: KSer,
    value_serializer: VSer,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, S, KSer, VSer> StreamDict<K, V, S, KSer, VSer>
where
    S: Read + Write + Seek,
    KSer: ItemSerializer<K>,
    VSer: ItemSerializer<V>,
{
    /// Wrap an existing storage instance. The storage must have been
    /// created with a nonzero key width.
    pub fn new(
        storage: ClusteredStorage<S>,
        key_serializer: KSer,
        value_serializer: VSer,
    ) -> Result<Self> {
        if storage.key_size() == 0 {
            return Err(StorageError::PreconditionViolation(
                "dictionary requires storage with a nonzero key size",
            ));
        }
        Ok(StreamDict {
            storage,
            key_serializer,
            value_serializer,
            _marker: PhantomData,
        })
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let reserved = self.reserved();
        (reserved..self.storage.record_count())
            .filter(|&slot| {
                self.storage
                    .record_entry(slot)
                    .map(|e| e.is_live())
                    .unwrap_or(false)
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace. Returns whether an existing value was replaced.
    pub fn insert(&mut self, key: &K, value: &V) -> Result<bool> {
        self.insert_full(key, value).map(|(_, replaced)| replaced)
    }

    pub fn get(&mut self, key: &K) -> Result<Option<V>> {
        match self.slot_for_key(key)? {
            Some(slot) => {
                let bytes = self.storage.read_record(slot)?;
                Ok(Some(self.value_serializer.deserialize(&bytes)?))
            }
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.slot_for_key(key)?.is_some())
    }

    /// Remove a key, reaping its slot. Returns whether it was present.
    pub fn remove(&mut self, key: &K) -> Result<bool> {
        match self.slot_for_key(key)? {
            Some(slot) => {
                self.storage.reap_record(slot)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Iterate live entries in slot order (materialized up front).
    pub fn iter(&mut self) -> Result<std::vec::IntoIter<(K, V)>> {
        Ok(self.to_vec()?.into_iter())
    }

    /// Materialize all live entries in slot order.
    pub fn to_vec(&mut self) -> Result<Vec<(K, V)>> {
        let reserved = self.reserved();
        let mut entries = Vec::new();
        for slot in reserved..self.storage.record_count() {
            if !self.storage.record_entry(slot)?.is_live() {
                continue;
            }
            let key = self.decode_key_blob(&self.storage.record_key(slot)?)?;
            let bytes = self.storage.read_record(slot)?;
            let value = self.value_serializer.deserialize(&bytes)?;
            entries.push((key, value));
        }
        Ok(entries)
    }

    pub fn storage(&self) -> &ClusteredStorage<S> {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut ClusteredStorage<S> {
        &mut self.storage
    }

    pub fn into_storage(self) -> ClusteredStorage<S> {
        self.storage
    }

    // ---- internals shared with the Merkle adapter -----------------------

    pub(crate) fn insert_full(&mut self, key: &K, value: &V) -> Result<(usize, bool)> {
        let blob = self.key_blob(key)?;
        let bytes = self.value_serializer.serialize(value)?;
        match self.storage.find_by_key(&blob)? {
            Some(slot) => {
                let mut scope = self.storage.enter_update_scope(slot)?;
                scope.write_bytes(&bytes)?;
                scope.commit()?;
                Ok((slot, true))
            }
            None => {
                let mut scope = self.storage.enter_add_scope()?;
                scope.set_key(&blob)?;
                scope.write_bytes(&bytes)?;
                let slot = scope.commit()?;
                Ok((slot, false))
            }
        }
    }

    pub(crate) fn slot_for_key(&self, key: &K) -> Result<Option<usize>> {
        let blob = self.key_blob(key)?;
        self.storage.find_by_key(&blob)
    }

    /// Slot the next brand-new key would land in: a reaped slot if one
    /// exists, else one past the current end.
    pub(crate) fn next_free_slot(&self) -> usize {
        self.storage
            .find_tombstone_slot()
            .unwrap_or_else(|| self.storage.record_count())
    }

    /// Length-prefixed key blob as stored in the directory (before the
    /// storage pads it to the fixed key width).
    pub(crate) fn key_blob(&self, key: &K) -> Result<Vec<u8>> {
        let key_bytes = self.key_serializer.serialize(key)?;
        let mut blob = Vec::with_capacity(key_bytes.len() + 2);
        encode_varint(&mut blob, key_bytes.len() as u64);
        blob.extend_from_slice(&key_bytes);
        if blob.len() > self.storage.key_size() as usize {
            return Err(StorageError::KeyTooLarge {
                len: blob.len(),
                max: self.storage.key_size() as usize,
            });
        }
        Ok(blob)
    }

    pub(crate) fn value_bytes(&self, value: &V) -> Result<Vec<u8>> {
        self.value_serializer.serialize(value)
    }

    pub(crate) fn reserved(&self) -> usize {
        self.storage.reserved_records() as usize
    }

    fn decode_key_blob(&self, blob: &[u8]) -> Result<K> {
        let mut pos = 0;
        let len = decode_varint(blob, &mut pos)? as usize;
        let end = pos + len;
        if end > blob.len() {
            return Err(StorageError::CorruptData(
                "key blob shorter than its declared length".into(),
            ));
        }
        self.key_serializer.deserialize(&blob[pos..end])
    }
}
