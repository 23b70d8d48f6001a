//! Benchmarks for clustered storage and Merkle collection throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use merklefile::{
    BincodeSerializer, ClusteredStorage, MerkleList, Sha256Hasher, StorageConfig,
};
use std::io::Cursor;

fn storage() -> ClusteredStorage<Cursor<Vec<u8>>> {
    let config = StorageConfig::default().with_cluster_size(4096);
    ClusteredStorage::create(Cursor::new(Vec::new()), &config).unwrap()
}

fn benchmark_record_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_add");

    for size in [64usize, 1024, 16 * 1024].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let payload = vec![0xa5u8; size];
            b.iter(|| {
                let mut storage = storage();
                for _ in 0..32 {
                    let mut scope = storage.enter_add_scope().unwrap();
                    scope.write_bytes(black_box(&payload)).unwrap();
                    scope.commit().unwrap();
                }
            });
        });
    }

    group.finish();
}

fn benchmark_record_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_read");

    for size in [64usize, 1024, 16 * 1024].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut storage = storage();
            let reserved = storage.reserved_records() as usize;
            let payload = vec![0x5au8; size];
            for _ in 0..32 {
                let mut scope = storage.enter_add_scope().unwrap();
                scope.write_bytes(&payload).unwrap();
                scope.commit().unwrap();
            }
            b.iter(|| {
                for i in 0..32 {
                    black_box(storage.read_record(reserved + i).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn benchmark_merkle_list_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle_list_add");

    for count in [16usize, 128].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let mut list =
                    MerkleList::create(storage(), BincodeSerializer, Sha256Hasher).unwrap();
                for i in 0..count {
                    list.add(black_box(&format!("item-{}", i))).unwrap();
                }
                black_box(list.root());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_record_add,
    benchmark_record_read,
    benchmark_merkle_list_add
);
criterion_main!(benches);
