//! Positional list over clustered storage.
//!
//! Logical index `i` maps to directory slot `reserved_records + i`. Removal
//! shifts subsequent records back, so indices stay dense; a `StreamList`
//! therefore assumes exclusive use of the storage's non-reserved region
//! (no interleaved tombstoning by other adapters).

use crate::error::{Result, StorageError};
use crate::serializer::ItemSerializer;
use crate::storage::ClusteredStorage;
use std::io::{Read, Seek, Write};
use std::marker::PhantomData;

pub struct StreamList<T, S: Read + Write + Seek, Ser: ItemSerializer<T>> {
    storage: ClusteredStorage<S>,
    serializer: Ser,
    _marker: PhantomData<T>,
}

impl<T, S: Read + Write + Seek, Ser: ItemSerializer<T>> StreamList<T, S, Ser> {
    /// Wrap an existing (created or reopened) storage instance.
    pub fn new(storage: ClusteredStorage<S>, serializer: Ser) -> Self {
        StreamList {
            storage,
            serializer,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.storage.record_count() - self.reserved()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&mut self, item: &T) -> Result<usize> {
        let bytes = self.serializer.serialize(item)?;
        self.add_raw(&bytes)
    }

    pub fn insert(&mut self, index: usize, item: &T) -> Result<()> {
        let bytes = self.serializer.serialize(item)?;
        self.insert_raw(index, &bytes)
    }

    pub fn update(&mut self, index: usize, item: &T) -> Result<()> {
        let bytes = self.serializer.serialize(item)?;
        self.update_raw(index, &bytes)
    }

    pub fn get(&mut self, index: usize) -> Result<T> {
        let bytes = self.get_raw(index)?;
        self.serializer.deserialize(&bytes)
    }

    pub fn remove_at(&mut self, index: usize) -> Result<()> {
        let slot = self.slot(index)?;
        self.storage.remove_record(slot)
    }

    /// Iterate items in logical order, reading each lazily.
    pub fn iter(&mut self) -> impl Iterator<Item = Result<T>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Materialize the whole list in logical order.
    pub fn to_vec(&mut self) -> Result<Vec<T>> {
        (0..self.len()).map(|i| self.get(i)).collect()
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

    pub(crate) fn serialize_item(&self, item: &T) -> Result<Vec<u8>> {
        self.serializer.serialize(item)
    }

    pub(crate) fn add_raw(&mut self, bytes: &[u8]) -> Result<usize> {
        let reserved = self.reserved();
        let mut scope = self.storage.enter_add_scope()?;
        scope.write_bytes(bytes)?;
        let slot = scope.commit()?;
        Ok(slot - reserved)
    }

    pub(crate) fn insert_raw(&mut self, index: usize, bytes: &[u8]) -> Result<()> {
        if index > self.len() {
            return Err(StorageError::IndexOutOfBounds {
                index,
                len: self.len(),
            });
        }
        let slot = self.reserved() + index;
        let mut scope = self.storage.enter_insert_scope(slot)?;
        scope.write_bytes(bytes)?;
        scope.commit()?;
        Ok(())
    }

    pub(crate) fn update_raw(&mut self, index: usize, bytes: &[u8]) -> Result<()> {
        let slot = self.slot(index)?;
        let mut scope = self.storage.enter_update_scope(slot)?;
        scope.write_bytes(bytes)?;
        scope.commit()?;
        Ok(())
    }

    pub(crate) fn get_raw(&mut self, index: usize) -> Result<Vec<u8>> {
        let slot = self.slot(index)?;
        self.storage.read_record(slot)
    }

    fn reserved(&self) -> usize {
        self.storage.reserved_records() as usize
    }

    fn slot(&self, index: usize) -> Result<usize> {
        if index >= self.len() {
            return Err(StorageError::IndexOutOfBounds {
                index,
                len: self.len(),
            });
        }
        Ok(self.reserved() + index)
    }
}
