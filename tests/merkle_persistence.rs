//! Merkle snapshot persistence tests
//!
//! Covers the authenticated collections across close/reopen cycles: the
//! persisted tree must describe exactly the bytes on disk, out-of-band
//! edits must be caught, and misconfigured storage must be rejected before
//! anything is written.

use merklefile::{
    BincodeSerializer, ClusteredStorage, MerkleDict, MerkleList, Sha256Hasher, StorageConfig,
    StorageError,
};
use std::io::Cursor;
use tempfile::NamedTempFile;

type List = MerkleList<String, Cursor<Vec<u8>>, BincodeSerializer, Sha256Hasher>;

fn list_config() -> StorageConfig {
    StorageConfig::default().with_cluster_size(64)
}

#[test]
fn test_list_round_trips_through_reopen() {
    let storage = ClusteredStorage::create(Cursor::new(Vec::new()), &list_config()).unwrap();
    let mut list: List = MerkleList::create(storage, BincodeSerializer, Sha256Hasher).unwrap();

    for item in ["first", "second", "third"] {
        list.add(&item.to_string()).unwrap();
    }
    assert_eq!(list.len(), 3);

    // Updating one item must leave the other leaves untouched.
    let leaf0 = list.leaf(0).unwrap().to_vec();
    let leaf2 = list.leaf(2).unwrap().to_vec();
    list.update(1, &"second-revised".to_string()).unwrap();
    assert_eq!(list.leaf(0).unwrap(), leaf0.as_slice());
    assert_eq!(list.leaf(2).unwrap(), leaf2.as_slice());

    let root = list.root();
    let stream = list.into_storage().into_stream();

    let storage = ClusteredStorage::open(stream, &list_config()).unwrap();
    let mut list: List = MerkleList::load(storage, BincodeSerializer, Sha256Hasher).unwrap();
    assert_eq!(list.root(), root);
    assert_eq!(
        list.to_vec().unwrap(),
        vec!["first", "second-revised", "third"]
    );
    list.verify().unwrap();
}

#[test]
fn test_list_requires_reserved_record_before_mutating() {
    let config = list_config().with_reserved_records(0);
    let storage = ClusteredStorage::create(Cursor::new(Vec::new()), &config).unwrap();
    let clusters_before = storage.stats().total_clusters;

    let result: Result<List, _> = MerkleList::create(storage, BincodeSerializer, Sha256Hasher);
    assert!(matches!(
        result,
        Err(StorageError::PreconditionViolation(_))
    ));

    // The failed construction must not have written anything: the stream
    // still opens as the plain storage it was.
    let storage = ClusteredStorage::create(Cursor::new(Vec::new()), &config).unwrap();
    assert_eq!(storage.stats().total_clusters, clusters_before);
}

#[test]
fn test_out_of_band_record_edit_fails_verify() {
    let storage = ClusteredStorage::create(Cursor::new(Vec::new()), &list_config()).unwrap();
    let mut list: List = MerkleList::create(storage, BincodeSerializer, Sha256Hasher).unwrap();
    list.add(&"alpha".to_string()).unwrap();
    list.add(&"beta".to_string()).unwrap();
    let reserved = list.storage().reserved_records() as usize;
    let stream = list.into_storage().into_stream();

    // Rewrite an item through the raw storage API, bypassing the tree.
    let mut storage = ClusteredStorage::open(stream, &list_config()).unwrap();
    {
        let mut scope = storage.enter_update_scope(reserved + 1).unwrap();
        scope.write_bytes(b"tampered").unwrap();
        scope.commit().unwrap();
    }
    let stream = storage.into_stream();

    let storage = ClusteredStorage::open(stream, &list_config()).unwrap();
    let mut list: List = MerkleList::load(storage, BincodeSerializer, Sha256Hasher).unwrap();
    assert!(matches!(
        list.verify(),
        Err(StorageError::CorruptStorage(_))
    ));
}

#[test]
fn test_garbled_snapshot_rejected_at_load() {
    let storage = ClusteredStorage::create(Cursor::new(Vec::new()), &list_config()).unwrap();
    let mut list: List = MerkleList::create(storage, BincodeSerializer, Sha256Hasher).unwrap();
    list.add(&"alpha".to_string()).unwrap();
    let stream = list.into_storage().into_stream();

    let mut storage = ClusteredStorage::open(stream, &list_config()).unwrap();
    {
        let mut scope = storage.enter_update_scope(0).unwrap();
        scope.write_bytes(&[1, 2, 3]).unwrap();
        scope.commit().unwrap();
    }
    let stream = storage.into_stream();

    let storage = ClusteredStorage::open(stream, &list_config()).unwrap();
    let result: Result<List, _> = MerkleList::load(storage, BincodeSerializer, Sha256Hasher);
    assert!(result.is_err());
}

#[test]
fn test_dict_slot_reuse_survives_reopen_on_disk() {
    let tmp = NamedTempFile::new().unwrap();
    let config = StorageConfig::default()
        .with_cluster_size(64)
        .with_key_size(32);
    type Dict = MerkleDict<
        String,
        u64,
        std::fs::File,
        BincodeSerializer,
        BincodeSerializer,
        Sha256Hasher,
    >;

    let root = {
        let storage = ClusteredStorage::create(tmp.reopen().unwrap(), &config).unwrap();
        let mut dict: Dict =
            MerkleDict::create(storage, BincodeSerializer, BincodeSerializer, Sha256Hasher)
                .unwrap();
        dict.insert(&"a".to_string(), &1).unwrap();
        dict.insert(&"b".to_string(), &2).unwrap();
        dict.remove(&"a".to_string()).unwrap();
        dict.insert(&"c".to_string(), &3).unwrap(); // reuses a's slot
        dict.root()
    };

    let storage = ClusteredStorage::open(tmp.reopen().unwrap(), &config).unwrap();
    let mut dict: Dict =
        MerkleDict::load(storage, BincodeSerializer, BincodeSerializer, Sha256Hasher).unwrap();
    assert_eq!(dict.root(), root);
    assert_eq!(dict.get(&"b".to_string()).unwrap(), Some(2));
    assert_eq!(dict.get(&"c".to_string()).unwrap(), Some(3));
    assert_eq!(dict.get(&"a".to_string()).unwrap(), None);
    dict.verify().unwrap();
}
