//! Property-based tests for storage correctness
//!
//! Uses proptest to verify that random mutation sequences leave the stream
//! in a state that reopens cleanly and reads back the expected contents.

use merklefile::{
    varint, BincodeSerializer, BoundedList, ClusteredStorage, MerkleList, Sha256Hasher,
    StorageConfig, VecStore,
};
use proptest::prelude::*;
use std::io::Cursor;

#[derive(Debug, Clone)]
enum Op {
    Add(Vec<u8>),
    Update(usize, Vec<u8>),
    Remove(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..300).prop_map(Op::Add),
        (any::<usize>(), prop::collection::vec(any::<u8>(), 0..300))
            .prop_map(|(i, bytes)| Op::Update(i, bytes)),
        any::<usize>().prop_map(Op::Remove),
    ]
}

proptest! {
    #[test]
    fn prop_storage_matches_model_and_reopens(
        ops in prop::collection::vec(op_strategy(), 1..40)
    ) {
        let config = StorageConfig::default().with_cluster_size(64);
        let mut storage =
            ClusteredStorage::create(Cursor::new(Vec::new()), &config).unwrap();
        let reserved = storage.reserved_records() as usize;
        let mut model: Vec<Vec<u8>> = Vec::new();

        for op in ops {
            match op {
                Op::Add(bytes) => {
                    let mut scope = storage.enter_add_scope().unwrap();
                    scope.write_bytes(&bytes).unwrap();
                    scope.commit().unwrap();
                    model.push(bytes);
                }
                Op::Update(i, bytes) => {
                    if model.is_empty() {
                        continue;
                    }
                    let i = i % model.len();
                    let mut scope = storage.enter_update_scope(reserved + i).unwrap();
                    scope.write_bytes(&bytes).unwrap();
                    scope.commit().unwrap();
                    model[i] = bytes;
                }
                Op::Remove(i) => {
                    if model.is_empty() {
                        continue;
                    }
                    let i = i % model.len();
                    storage.remove_record(reserved + i).unwrap();
                    model.remove(i);
                }
            }
        }

        let stats = storage.stats();
        prop_assert!(stats.free_clusters <= stats.total_clusters);
        prop_assert_eq!(stats.record_count as usize, reserved + model.len());

        // Reopen runs the full structural audit: every cluster must be
        // referenced exactly once by the free list, the directory chain,
        // or a live record chain.
        let mut reopened =
            ClusteredStorage::open(storage.into_stream(), &config).unwrap();
        for (i, bytes) in model.iter().enumerate() {
            prop_assert_eq!(&reopened.read_record(reserved + i).unwrap(), bytes);
        }
    }

    #[test]
    fn prop_merkle_list_root_matches_recomputation(
        items in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..100), 0..20)
    ) {
        let config = StorageConfig::default().with_cluster_size(64);
        let storage =
            ClusteredStorage::create(Cursor::new(Vec::new()), &config).unwrap();
        let mut list = MerkleList::create(storage, BincodeSerializer, Sha256Hasher).unwrap();
        for item in &items {
            list.add(item).unwrap();
        }
        let root = list.root();
        let stream = list.into_storage().into_stream();

        let storage = ClusteredStorage::open(stream, &config).unwrap();
        let mut list: MerkleList<Vec<u8>, _, _, _> =
            MerkleList::load(storage, BincodeSerializer, Sha256Hasher).unwrap();
        prop_assert_eq!(list.root(), root);
        list.verify().unwrap();
        prop_assert_eq!(list.to_vec().unwrap(), items);
    }

    #[test]
    fn prop_varint_round_trip(value in any::<u64>()) {
        let mut buf = Vec::new();
        varint::encode_varint(&mut buf, value);
        prop_assert_eq!(buf.len(), varint::encoded_len(value));

        let mut pos = 0;
        prop_assert_eq!(varint::decode_varint(&buf, &mut pos).unwrap(), value);
        prop_assert_eq!(pos, buf.len());
    }

    #[test]
    fn prop_bounded_list_matches_vec(
        ops in prop::collection::vec((0u8..3, any::<usize>(), any::<u32>()), 1..60)
    ) {
        let mut list: BoundedList<u32, VecStore<u32>> =
            BoundedList::new(VecStore::new(64));
        let mut model: Vec<u32> = Vec::new();

        for (kind, index, value) in ops {
            if model.len() == list.capacity() {
                list.grow(list.capacity() * 2);
            }
            match kind {
                0 => {
                    list.add(value).unwrap();
                    model.push(value);
                }
                1 => {
                    let index = index % (model.len() + 1);
                    list.insert(index, value).unwrap();
                    model.insert(index, value);
                }
                _ => {
                    if model.is_empty() {
                        continue;
                    }
                    let index = index % model.len();
                    prop_assert_eq!(list.remove_at(index).unwrap(), model.remove(index));
                }
            }
        }

        prop_assert_eq!(list.count(), model.len());
        prop_assert_eq!(list.iter().collect::<Vec<_>>(), model);
    }
}
