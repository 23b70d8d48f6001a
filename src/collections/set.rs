//! Hash set over clustered storage.
//!
//! Membership is keyed by the digest of the serialized item, stored in the
//! directory's fixed-width key field; the storage must be created with
//! `key_size == digest_len`. Lookups never read cluster data.

use crate::error::{Result, StorageError};
use crate::hash::ItemHasher;
use crate::serializer::ItemSerializer;
use crate::storage::ClusteredStorage;
use std::io::{Read, Seek, Write};
use std::marker::PhantomData;

pub struct StreamSet<T, S, Ser, H>
where
    S: Read + Write + Seek,
    Ser: ItemSerializer<T>,
    H: ItemHasher,
{
    storage: ClusteredStorage<S>,
    serializer: Ser,
    hasher: H,
    _marker: PhantomData<T>,
}

impl<T, S, Ser, H> StreamSet<T, S, Ser, H>
where
    S: Read + Write + Seek,
    Ser: ItemSerializer<T>,
    H: ItemHasher,
{
    pub fn new(storage: ClusteredStorage<S>, serializer: Ser, hasher: H) -> Result<Self> {
        if storage.key_size() as usize != hasher.digest_len() {
            return Err(StorageError::PreconditionViolation(
                "set requires storage key size equal to the hasher digest length",
            ));
        }
        Ok(StreamSet {
            storage,
            serializer,
            hasher,
            _marker: PhantomData,
        })
    }

    /// Number of live members.
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

    /// Insert an item. Returns `false` if an equal item was already present.
    pub fn insert(&mut self, item: &T) -> Result<bool> {
        self.insert_full(item).map(|(_, inserted)| inserted)
    }

    pub fn contains(&self, item: &T) -> Result<bool> {
        Ok(self.slot_for(item)?.is_some())
    }

    /// Remove an item, reaping its slot. Returns whether it was present.
    pub fn remove(&mut self, item: &T) -> Result<bool> {
        match self.slot_for(item)? {
            Some(slot) => {
                self.storage.reap_record(slot)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Iterate live members in slot order (materialized up front).
    pub fn iter(&mut self) -> Result<std::vec::IntoIter<T>> {
        Ok(self.to_vec()?.into_iter())
    }

    /// Materialize all live members in slot order.
    pub fn to_vec(&mut self) -> Result<Vec<T>> {
        let reserved = self.reserved();
        let mut items = Vec::new();
        for slot in reserved..self.storage.record_count() {
            if !self.storage.record_entry(slot)?.is_live() {
                continue;
            }
            let bytes = self.storage.read_record(slot)?;
            items.push(self.serializer.deserialize(&bytes)?);
        }
        Ok(items)
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

    pub(crate) fn insert_full(&mut self, item: &T) -> Result<(usize, bool)> {
        let bytes = self.serializer.serialize(item)?;
        let digest = self.hasher.digest(&bytes);
        if let Some(slot) = self.storage.find_by_key(&digest)? {
            return Ok((slot, false));
        }
        let mut scope = self.storage.enter_add_scope()?;
        scope.set_key(&digest)?;
        scope.write_bytes(&bytes)?;
        let slot = scope.commit()?;
        Ok((slot, true))
    }

    pub(crate) fn slot_for(&self, item: &T) -> Result<Option<usize>> {
        let bytes = self.serializer.serialize(item)?;
        let digest = self.hasher.digest(&bytes);
        self.storage.find_by_key(&digest)
    }

    pub(crate) fn item_digest(&self, item: &T) -> Result<Vec<u8>> {
        let bytes = self.serializer.serialize(item)?;
        Ok(self.hasher.digest(&bytes))
    }

    pub(crate) fn next_free_slot(&self) -> usize {
        self.storage
            .find_tombstone_slot()
            .unwrap_or_else(|| self.storage.record_count())
    }

    pub(crate) fn reserved(&self) -> usize {
        self.storage.reserved_records() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::hash::Sha256Hasher;
    use crate::serializer::BincodeSerializer;
    use std::io::Cursor;

    type Set = StreamSet<String, Cursor<Vec<u8>>, BincodeSerializer, Sha256Hasher>;

    fn set() -> Set {
        let config = StorageConfig::default()
            .with_cluster_size(64)
            .with_key_size(32);
        let storage = ClusteredStorage::create(Cursor::new(Vec::new()), &config).unwrap();
        StreamSet::new(storage, BincodeSerializer, Sha256Hasher).unwrap()
    }

    #[test]
    fn test_insert_contains_remove() {
        let mut s = set();
        assert!(s.insert(&"apple".to_string()).unwrap());
        assert!(!s.insert(&"apple".to_string()).unwrap()); // duplicate
        assert!(s.insert(&"pear".to_string()).unwrap());
        assert_eq!(s.len(), 2);

        assert!(s.contains(&"apple".to_string()).unwrap());
        assert!(!s.contains(&"plum".to_string()).unwrap());

        assert!(s.remove(&"apple".to_string()).unwrap());
        assert!(!s.remove(&"apple".to_string()).unwrap());
        assert_eq!(s.len(), 1);
        assert_eq!(s.to_vec().unwrap(), vec!["pear".to_string()]);
    }

    #[test]
    fn test_key_width_must_match_digest() {
        let config = StorageConfig::default()
            .with_cluster_size(64)
            .with_key_size(16); // not 32
        let storage = ClusteredStorage::create(Cursor::new(Vec::new()), &config).unwrap();
        let result: Result<Set> = StreamSet::new(storage, BincodeSerializer, Sha256Hasher);
        assert!(matches!(
            result,
            Err(StorageError::PreconditionViolation(_))
        ));
    }
}
