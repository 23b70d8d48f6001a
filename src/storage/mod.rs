//! Clustered storage: allocator and record directory over one stream.
//!
//! The stream is partitioned into fixed-size clusters after a fixed header
//! region. Records are variable-length byte strings held in chains of
//! clusters linked through per-cluster next-pointers; freed chains are
//! threaded onto an intrusive free list. Low-numbered record slots
//! (`[0, reserved_records)`) are set aside for engine metadata and never
//! handed out by ordinary adds.
//!
//! All mutation flows through the scope protocol in [`scope`]; the directory,
//! free list and header are never written around it.

pub mod directory;
pub mod freelist;
pub mod scope;

pub use scope::RecordScope;

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::header::{StorageHeader, HEADER_SIZE, NIL_CLUSTER};
use directory::{Directory, DirectoryEntry};
use freelist::FreeList;
use lru::LruCache;
use scope::ScopeKind;
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use tracing::{debug, warn};

/// Point-in-time storage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub total_clusters: u64,
    pub free_clusters: u64,
    pub record_count: u64,
    pub reserved_records: u32,
}

/// Single-file clustered storage over a caller-owned seekable stream.
///
/// Not internally synchronized: one instance owns its stream exclusively
/// and all mutating operations take `&mut self`.
pub struct ClusteredStorage<S: Read + Write + Seek> {
    stream: S,
    header: StorageHeader,
    directory: Directory,
    freelist: FreeList,
    cache: LruCache<u64, Vec<u8>>,
    max_records: usize,
    scope_open: bool,
}

impl<S: Read + Write + Seek> ClusteredStorage<S> {
    /// Initialize fresh storage on `stream`, writing the header and the
    /// (empty, reserved-only) directory.
    pub fn create(mut stream: S, config: &StorageConfig) -> Result<Self> {
        config.validate()?;

        let mut header =
            StorageHeader::new(config.cluster_size, config.key_size, config.reserved_records);
        header.record_count = config.reserved_records as u64;

        let mut directory = Directory::new(config.key_size, config.max_records);
        for _ in 0..config.reserved_records {
            directory.push(DirectoryEntry::empty(config.key_size))?;
        }

        stream.seek(SeekFrom::Start(0))?;
        stream.write_all(&header.to_bytes())?;

        let mut storage = ClusteredStorage {
            stream,
            header,
            directory,
            freelist: FreeList::new(),
            cache: Self::new_cache(config.cache_clusters),
            max_records: config.max_records,
            scope_open: false,
        };
        storage.flush_meta()?;
        debug!(
            cluster_size = config.cluster_size,
            reserved = config.reserved_records,
            "created clustered storage"
        );
        Ok(storage)
    }

    /// Open existing storage, validating the header, reloading the
    /// directory, and cross-checking every chain against the directory.
    ///
    /// Only the runtime knobs of `config` (cache size, record cap) apply;
    /// geometry comes from the header.
    pub fn open(mut stream: S, config: &StorageConfig) -> Result<Self> {
        config.validate()?;

        stream.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; HEADER_SIZE];
        stream.read_exact(&mut buf).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                StorageError::CorruptStorage("stream shorter than storage header".into())
            } else {
                StorageError::Io(err)
            }
        })?;
        let header = StorageHeader::from_bytes(&buf)?;

        let freelist = FreeList::from_header(header.freelist_head, header.free_clusters)?;

        let mut storage = ClusteredStorage {
            stream,
            header,
            directory: Directory::new(0, config.max_records), // replaced below
            freelist,
            cache: Self::new_cache(config.cache_clusters),
            max_records: config.max_records,
            scope_open: false,
        };

        storage.directory = if storage.header.directory_len == 0 {
            if storage.header.record_count != 0 {
                return Err(StorageError::CorruptStorage(format!(
                    "header claims {} records but no directory chain",
                    storage.header.record_count
                )));
            }
            Directory::new(storage.header.key_size, config.max_records)
        } else {
            let bytes = storage.read_chain_bytes(
                storage.header.directory_head,
                storage.header.directory_len,
                "directory",
            )?;
            Directory::decode(&bytes, storage.header.key_size, config.max_records)?
        };

        if storage.directory.len() as u64 != storage.header.record_count {
            return Err(StorageError::CorruptStorage(format!(
                "directory holds {} entries, header claims {}",
                storage.directory.len(),
                storage.header.record_count
            )));
        }

        storage.verify_structure()?;
        Ok(storage)
    }

    // ---- geometry & accessors ------------------------------------------

    pub fn header(&self) -> &StorageHeader {
        &self.header
    }

    pub fn cluster_size(&self) -> u32 {
        self.header.cluster_size
    }

    pub fn key_size(&self) -> u16 {
        self.header.key_size
    }

    pub fn reserved_records(&self) -> u32 {
        self.header.reserved_records
    }

    /// Total directory slots, including reserved and tombstoned ones.
    pub fn record_count(&self) -> usize {
        self.directory.len()
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            total_clusters: self.header.total_clusters,
            free_clusters: self.freelist.len(),
            record_count: self.directory.len() as u64,
            reserved_records: self.header.reserved_records,
        }
    }

    /// Consume the storage, returning the underlying stream.
    pub fn into_stream(self) -> S {
        self.stream
    }

    fn payload_size(&self) -> usize {
        self.header.payload_size()
    }

    fn cluster_offset(&self, cluster: u64) -> u64 {
        HEADER_SIZE as u64 + cluster * self.header.cluster_size as u64
    }

    fn new_cache(cache_clusters: usize) -> LruCache<u64, Vec<u8>> {
        LruCache::new(NonZeroUsize::new(cache_clusters.max(1)).expect("nonzero cache size"))
    }

    fn clusters_for_len(&self, len: u64) -> u64 {
        let payload = self.payload_size() as u64;
        len.div_ceil(payload)
    }

    // ---- record access --------------------------------------------------

    /// Directory entry metadata for a record slot.
    pub fn record_entry(&self, index: usize) -> Result<DirectoryEntry> {
        self.directory.get(index)
    }

    /// Key blob of a live record slot.
    pub fn record_key(&self, index: usize) -> Result<Vec<u8>> {
        Ok(self.directory.get(index)?.key)
    }

    /// Find the first non-reserved live record with the given key blob.
    pub fn find_by_key(&self, key: &[u8]) -> Result<Option<usize>> {
        let padded = self.normalize_key(key)?;
        Ok(self
            .directory
            .find_by_key(&padded, self.header.reserved_records as usize))
    }

    /// First reusable (tombstoned) slot outside the reserved region.
    pub(crate) fn find_tombstone_slot(&self) -> Option<usize> {
        self.directory
            .find_tombstone(self.header.reserved_records as usize)
    }

    /// Read a record's full byte content.
    pub fn read_record(&mut self, index: usize) -> Result<Vec<u8>> {
        let entry = self.directory.get(index)?;
        if entry.tombstone {
            return Err(StorageError::PreconditionViolation(
                "record slot is reaped",
            ));
        }
        let mut bytes = Vec::with_capacity(entry.length as usize);
        let mut remaining = entry.length;
        let mut cursor = entry.first_cluster;
        while remaining > 0 {
            if cursor == NIL_CLUSTER {
                return Err(StorageError::CorruptStorage(format!(
                    "record {} chain ends {} bytes early",
                    index, remaining
                )));
            }
            self.check_cluster(cursor)?;
            let payload = self.read_payload(cursor)?;
            let take = (remaining as usize).min(payload.len());
            bytes.extend_from_slice(&payload[..take]);
            remaining -= take as u64;
            cursor = self.read_next(cursor)?;
        }
        if cursor != NIL_CLUSTER {
            return Err(StorageError::CorruptStorage(format!(
                "record {} chain continues past its length",
                index
            )));
        }
        Ok(bytes)
    }

    // ---- scope entry points ---------------------------------------------

    /// Open a write scope appending a new record (reusing a reaped slot if
    /// one exists).
    pub fn enter_add_scope(&mut self) -> Result<RecordScope<'_, S>> {
        self.begin_scope(self.directory.len() as u64)?;
        Ok(RecordScope::new(self, ScopeKind::Add))
    }

    /// Open a write scope inserting a record at directory `index`, shifting
    /// subsequent records forward.
    pub fn enter_insert_scope(&mut self, index: usize) -> Result<RecordScope<'_, S>> {
        let reserved = self.header.reserved_records as usize;
        if index < reserved {
            return Err(StorageError::PreconditionViolation(
                "cannot insert into the reserved record region",
            ));
        }
        if index > self.directory.len() {
            return Err(StorageError::IndexOutOfBounds {
                index,
                len: self.directory.len(),
            });
        }
        self.begin_scope(index as u64)?;
        Ok(RecordScope::new(self, ScopeKind::Insert(index)))
    }

    /// Open a write scope replacing the content of record `index`.
    ///
    /// Reserved slots are reachable here by explicit index; this is how
    /// engine metadata (e.g. a Merkle snapshot) is persisted.
    pub fn enter_update_scope(&mut self, index: usize) -> Result<RecordScope<'_, S>> {
        let entry = self.directory.get(index)?;
        if entry.tombstone {
            return Err(StorageError::PreconditionViolation(
                "cannot update a reaped record slot",
            ));
        }
        self.begin_scope(index as u64)?;
        Ok(RecordScope::new(self, ScopeKind::Update(index)))
    }

    /// Reap a record: free its chain and tombstone the slot for reuse,
    /// without shifting any indices.
    pub fn reap_record(&mut self, index: usize) -> Result<()> {
        self.check_mutable(index)?;
        let entry = self.directory.get(index)?;
        if entry.tombstone {
            warn!(record = index, "reap of already-reaped record slot");
            return Ok(());
        }
        if entry.has_chain() {
            self.free_chain(entry.first_cluster)?;
        }
        self.directory
            .set(index, DirectoryEntry::tombstone(self.header.key_size))?;
        self.flush_meta()
    }

    /// Remove a record and its slot, shifting subsequent records back.
    pub fn remove_record(&mut self, index: usize) -> Result<()> {
        self.check_mutable(index)?;
        let entry = self.directory.get(index)?;
        if entry.is_live() && entry.has_chain() {
            self.free_chain(entry.first_cluster)?;
        }
        self.directory.remove_at(index)?;
        self.flush_meta()
    }

    /// Persist directory and header. Scope commits call this implicitly.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_meta()
    }

    fn check_mutable(&self, index: usize) -> Result<()> {
        if self.scope_open {
            return Err(StorageError::ConcurrentAccess {
                record: index as u64,
            });
        }
        let reserved = self.header.reserved_records as usize;
        if index < reserved {
            return Err(StorageError::PreconditionViolation(
                "cannot remove a reserved record",
            ));
        }
        if index >= self.directory.len() {
            return Err(StorageError::IndexOutOfBounds {
                index,
                len: self.directory.len(),
            });
        }
        Ok(())
    }

    fn begin_scope(&mut self, record: u64) -> Result<()> {
        if self.scope_open {
            return Err(StorageError::ConcurrentAccess { record });
        }
        self.scope_open = true;
        Ok(())
    }

    pub(crate) fn end_scope(&mut self) {
        self.scope_open = false;
    }

    // ---- scope finalization (called by RecordScope) ---------------------

    pub(crate) fn finish_add(&mut self, bytes: &[u8], key: Option<Vec<u8>>) -> Result<usize> {
        let key = self.scope_key(key)?;
        let (first_cluster, length) = self.write_record_data(bytes)?;
        let entry = DirectoryEntry {
            first_cluster,
            length,
            tombstone: false,
            key,
        };
        let reserved = self.header.reserved_records as usize;
        let index = match self.directory.find_tombstone(reserved) {
            Some(slot) => {
                self.directory.set(slot, entry)?;
                slot
            }
            None => match self.directory.push(entry) {
                Ok(slot) => slot,
                Err(err) => {
                    // Directory is full; give the chain back before bailing.
                    if first_cluster != NIL_CLUSTER {
                        self.free_chain(first_cluster)?;
                    }
                    return Err(err);
                }
            },
        };
        self.flush_meta()?;
        debug!(record = index, bytes = bytes.len(), "added record");
        Ok(index)
    }

    pub(crate) fn finish_insert(
        &mut self,
        index: usize,
        bytes: &[u8],
        key: Option<Vec<u8>>,
    ) -> Result<usize> {
        let key = self.scope_key(key)?;
        let (first_cluster, length) = self.write_record_data(bytes)?;
        let inserted = self.directory.insert(
            index,
            DirectoryEntry {
                first_cluster,
                length,
                tombstone: false,
                key,
            },
        );
        if let Err(err) = inserted {
            if first_cluster != NIL_CLUSTER {
                self.free_chain(first_cluster)?;
            }
            return Err(err);
        }
        self.flush_meta()?;
        debug!(record = index, bytes = bytes.len(), "inserted record");
        Ok(index)
    }

    pub(crate) fn finish_update(
        &mut self,
        index: usize,
        bytes: &[u8],
        key: Option<Vec<u8>>,
    ) -> Result<usize> {
        let old = self.directory.get(index)?;
        if old.has_chain() {
            self.free_chain(old.first_cluster)?;
        }
        let key = match key {
            Some(new_key) => self.normalize_key(&new_key)?,
            None => old.key,
        };
        let (first_cluster, length) = self.write_record_data(bytes)?;
        self.directory.set(
            index,
            DirectoryEntry {
                first_cluster,
                length,
                tombstone: false,
                key,
            },
        )?;
        self.flush_meta()?;
        debug!(record = index, bytes = bytes.len(), "updated record");
        Ok(index)
    }

    fn scope_key(&self, key: Option<Vec<u8>>) -> Result<Vec<u8>> {
        match key {
            Some(key) => self.normalize_key(&key),
            None => Ok(vec![0u8; self.header.key_size as usize]),
        }
    }

    fn normalize_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        let width = self.header.key_size as usize;
        if key.len() > width {
            return Err(StorageError::KeyTooLarge {
                len: key.len(),
                max: width,
            });
        }
        let mut padded = key.to_vec();
        padded.resize(width, 0);
        Ok(padded)
    }

    // ---- cluster I/O ----------------------------------------------------

    fn check_cluster(&self, cluster: u64) -> Result<()> {
        if cluster >= self.header.total_clusters {
            return Err(StorageError::CorruptStorage(format!(
                "cluster pointer {} beyond region ({} clusters)",
                cluster, self.header.total_clusters
            )));
        }
        Ok(())
    }

    fn read_next(&mut self, cluster: u64) -> Result<u64> {
        self.check_cluster(cluster)?;
        self.stream
            .seek(SeekFrom::Start(self.cluster_offset(cluster)))?;
        let mut buf = [0u8; 8];
        self.stream.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_payload(&mut self, cluster: u64) -> Result<Vec<u8>> {
        self.check_cluster(cluster)?;
        if let Some(payload) = self.cache.get(&cluster) {
            return Ok(payload.clone());
        }
        self.stream
            .seek(SeekFrom::Start(self.cluster_offset(cluster) + 8))?;
        let mut payload = vec![0u8; self.payload_size()];
        self.stream.read_exact(&mut payload)?;
        self.cache.put(cluster, payload.clone());
        Ok(payload)
    }

    fn write_cluster(&mut self, cluster: u64, next: u64, payload: &[u8]) -> Result<()> {
        debug_assert!(payload.len() <= self.payload_size());
        let mut buf = Vec::with_capacity(self.header.cluster_size as usize);
        buf.extend_from_slice(&next.to_le_bytes());
        buf.extend_from_slice(payload);
        buf.resize(self.header.cluster_size as usize, 0);

        self.stream
            .seek(SeekFrom::Start(self.cluster_offset(cluster)))?;
        self.stream.write_all(&buf)?;
        self.cache.put(cluster, buf[8..].to_vec());
        Ok(())
    }

    fn write_next_only(&mut self, cluster: u64, next: u64) -> Result<()> {
        self.stream
            .seek(SeekFrom::Start(self.cluster_offset(cluster)))?;
        self.stream.write_all(&next.to_le_bytes())?;
        Ok(())
    }

    // ---- allocation -----------------------------------------------------

    fn allocate_chain(&mut self, count: u64) -> Result<Vec<u64>> {
        let mut clusters = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let cluster = if self.freelist.is_empty() {
                let appended = self.header.total_clusters;
                self.header.total_clusters += 1;
                appended
            } else {
                let head = self.freelist.head();
                let next = self.read_next(head)?;
                self.freelist.pop(next)?
            };
            clusters.push(cluster);
        }
        self.header.free_clusters = self.freelist.len();
        debug!(count, "allocated cluster chain");
        Ok(clusters)
    }

    fn free_chain(&mut self, first_cluster: u64) -> Result<u64> {
        let mut freed = 0u64;
        let mut cursor = first_cluster;
        while cursor != NIL_CLUSTER {
            self.check_cluster(cursor)?;
            if freed > self.header.total_clusters {
                return Err(StorageError::CorruptStorage(
                    "cycle detected while freeing cluster chain".into(),
                ));
            }
            let next = self.read_next(cursor)?;
            let previous_head = self.freelist.push(cursor);
            self.write_next_only(cursor, previous_head)?;
            self.cache.pop(&cursor);
            cursor = next;
            freed += 1;
        }
        self.header.free_clusters = self.freelist.len();
        debug!(freed, "freed cluster chain");
        Ok(freed)
    }

    fn write_record_data(&mut self, bytes: &[u8]) -> Result<(u64, u64)> {
        if bytes.is_empty() {
            return Ok((NIL_CLUSTER, 0));
        }
        let count = self.clusters_for_len(bytes.len() as u64);
        let chain = self.allocate_chain(count)?;
        let payload = self.payload_size();
        for (i, &cluster) in chain.iter().enumerate() {
            let next = chain.get(i + 1).copied().unwrap_or(NIL_CLUSTER);
            let start = i * payload;
            let end = (start + payload).min(bytes.len());
            self.write_cluster(cluster, next, &bytes[start..end])?;
        }
        Ok((chain[0], bytes.len() as u64))
    }

    // ---- metadata persistence & validation ------------------------------

    fn flush_meta(&mut self) -> Result<()> {
        let encoded = self.directory.encode();

        if self.header.directory_head != NIL_CLUSTER {
            self.free_chain(self.header.directory_head)?;
        }
        let (head, len) = self.write_record_data(&encoded)?;

        self.header.directory_head = head;
        self.header.directory_len = len;
        self.header.record_count = self.directory.len() as u64;
        self.header.freelist_head = self.freelist.head();
        self.header.free_clusters = self.freelist.len();

        self.stream.seek(SeekFrom::Start(0))?;
        self.stream.write_all(&self.header.to_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_chain_bytes(&mut self, first_cluster: u64, len: u64, what: &str) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(len as usize);
        let mut remaining = len;
        let mut cursor = first_cluster;
        while remaining > 0 {
            if cursor == NIL_CLUSTER {
                return Err(StorageError::CorruptStorage(format!(
                    "{} chain ends {} bytes early",
                    what, remaining
                )));
            }
            self.check_cluster(cursor)?;
            let payload = self.read_payload(cursor)?;
            let take = (remaining as usize).min(payload.len());
            bytes.extend_from_slice(&payload[..take]);
            remaining -= take as u64;
            cursor = self.read_next(cursor)?;
        }
        if cursor != NIL_CLUSTER {
            return Err(StorageError::CorruptStorage(format!(
                "{} chain continues past its length",
                what
            )));
        }
        Ok(bytes)
    }

    /// Cross-check chains, free list and directory after open.
    ///
    /// Every cluster must be referenced exactly once: by the free list, the
    /// directory chain, or one live record chain. A mismatch between a
    /// record's length and its chain (the footprint of a torn scope) is
    /// surfaced here instead of being silently accepted.
    fn verify_structure(&mut self) -> Result<()> {
        let total = self.header.total_clusters as usize;
        let mut seen = vec![false; total];

        // Free list.
        let mut cursor = self.freelist.head();
        let mut walked = 0u64;
        while cursor != NIL_CLUSTER {
            self.check_cluster(cursor)?;
            self.mark_seen(&mut seen, cursor, "free list")?;
            walked += 1;
            if walked > self.freelist.len() {
                return Err(StorageError::CorruptStorage(
                    "free list longer than header count".into(),
                ));
            }
            cursor = self.read_next(cursor)?;
        }
        if walked != self.freelist.len() {
            return Err(StorageError::CorruptStorage(format!(
                "free list holds {} clusters, header claims {}",
                walked,
                self.freelist.len()
            )));
        }

        // Directory chain.
        if self.header.directory_len > 0 {
            self.verify_chain(
                self.header.directory_head,
                self.clusters_for_len(self.header.directory_len),
                &mut seen,
                "directory",
            )?;
        }

        // Record chains.
        for index in 0..self.directory.len() {
            let entry = self.directory.get(index)?;
            if !entry.is_live() {
                continue;
            }
            let expected = self.clusters_for_len(entry.length);
            if expected == 0 {
                if entry.has_chain() {
                    return Err(StorageError::CorruptStorage(format!(
                        "record {} is empty but references cluster {}",
                        index, entry.first_cluster
                    )));
                }
                continue;
            }
            self.verify_chain(entry.first_cluster, expected, &mut seen, "record")?;
        }

        if let Some(leaked) = seen.iter().position(|&s| !s) {
            return Err(StorageError::CorruptStorage(format!(
                "cluster {} referenced by nothing (leak)",
                leaked
            )));
        }
        Ok(())
    }

    fn verify_chain(
        &mut self,
        first_cluster: u64,
        expected: u64,
        seen: &mut [bool],
        what: &str,
    ) -> Result<()> {
        let mut cursor = first_cluster;
        for _ in 0..expected {
            if cursor == NIL_CLUSTER {
                return Err(StorageError::CorruptStorage(format!(
                    "{} chain shorter than its recorded length",
                    what
                )));
            }
            self.check_cluster(cursor)?;
            self.mark_seen(seen, cursor, what)?;
            cursor = self.read_next(cursor)?;
        }
        if cursor != NIL_CLUSTER {
            return Err(StorageError::CorruptStorage(format!(
                "{} chain longer than its recorded length",
                what
            )));
        }
        Ok(())
    }

    fn mark_seen(&self, seen: &mut [bool], cluster: u64, what: &str) -> Result<()> {
        let slot = &mut seen[cluster as usize];
        if *slot {
            return Err(StorageError::CorruptStorage(format!(
                "cluster {} referenced twice (second reference from {})",
                cluster, what
            )));
        }
        *slot = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn small_config() -> StorageConfig {
        StorageConfig::default()
            .with_cluster_size(64)
            .with_reserved_records(1)
    }

    fn new_storage() -> ClusteredStorage<Cursor<Vec<u8>>> {
        ClusteredStorage::create(Cursor::new(Vec::new()), &small_config()).unwrap()
    }

    fn add_record(storage: &mut ClusteredStorage<Cursor<Vec<u8>>>, bytes: &[u8]) -> usize {
        let mut scope = storage.enter_add_scope().unwrap();
        scope.write_bytes(bytes).unwrap();
        scope.commit().unwrap()
    }

    #[test]
    fn test_create_then_reopen() {
        let mut storage = new_storage();
        let index = add_record(&mut storage, b"hello clustered world");
        assert_eq!(index, 1); // slot 0 is reserved

        let stream = storage.into_stream();
        let mut reopened = ClusteredStorage::open(stream, &small_config()).unwrap();
        assert_eq!(reopened.record_count(), 2);
        assert_eq!(reopened.read_record(1).unwrap(), b"hello clustered world");
        assert_eq!(reopened.read_record(0).unwrap(), b""); // reserved, empty
    }

    #[test]
    fn test_multi_cluster_record() {
        let mut storage = new_storage();
        let data: Vec<u8> = (0..1000u32).map(|v| v as u8).collect();
        let index = add_record(&mut storage, &data);
        assert_eq!(storage.read_record(index).unwrap(), data);

        // 64-byte clusters carry 56 payload bytes each.
        let expected_clusters = (data.len() as u64).div_ceil(56);
        let entry = storage.record_entry(index).unwrap();
        assert_eq!(entry.length, data.len() as u64);
        assert!(storage.stats().total_clusters >= expected_clusters);
    }

    #[test]
    fn test_free_list_reuse_on_churn() {
        let mut storage = new_storage();
        let index = add_record(&mut storage, &[7u8; 500]);
        let total_after_add = storage.stats().total_clusters;

        storage.remove_record(index).unwrap();
        let index = add_record(&mut storage, &[8u8; 500]);
        assert_eq!(storage.read_record(index).unwrap(), vec![8u8; 500]);

        // Same-sized payload goes back into the freed clusters.
        assert_eq!(storage.stats().total_clusters, total_after_add);
    }

    #[test]
    fn test_update_relocates_chain() {
        let mut storage = new_storage();
        let index = add_record(&mut storage, &[1u8; 300]);

        let mut scope = storage.enter_update_scope(index).unwrap();
        scope.write_bytes(&[2u8; 40]).unwrap();
        scope.commit().unwrap();
        assert_eq!(storage.read_record(index).unwrap(), vec![2u8; 40]);

        let stats = storage.stats();
        assert!(stats.free_clusters > 0); // shrink released clusters
    }

    #[test]
    fn test_insert_shifts_records() {
        let mut storage = new_storage();
        add_record(&mut storage, b"first");
        add_record(&mut storage, b"third");

        let mut scope = storage.enter_insert_scope(2).unwrap();
        scope.write_bytes(b"second").unwrap();
        scope.commit().unwrap();

        assert_eq!(storage.read_record(1).unwrap(), b"first");
        assert_eq!(storage.read_record(2).unwrap(), b"second");
        assert_eq!(storage.read_record(3).unwrap(), b"third");
    }

    #[test]
    fn test_reap_and_reuse_slot() {
        let mut storage = new_storage();
        let a = add_record(&mut storage, b"aaa");
        let b = add_record(&mut storage, b"bbb");

        storage.reap_record(a).unwrap();
        assert!(storage.record_entry(a).unwrap().tombstone);
        assert!(matches!(
            storage.read_record(a),
            Err(StorageError::PreconditionViolation(_))
        ));
        // b keeps its index; the reaped slot is reused by the next add.
        assert_eq!(storage.read_record(b).unwrap(), b"bbb");
        let c = add_record(&mut storage, b"ccc");
        assert_eq!(c, a);
        assert_eq!(storage.read_record(c).unwrap(), b"ccc");
    }

    #[test]
    fn test_reserved_region_protected() {
        let mut storage = new_storage();
        assert!(matches!(
            storage.remove_record(0),
            Err(StorageError::PreconditionViolation(_))
        ));
        assert!(matches!(
            storage.enter_insert_scope(0),
            Err(StorageError::PreconditionViolation(_))
        ));
        // Updates by explicit index are allowed: that is how metadata lands.
        let mut scope = storage.enter_update_scope(0).unwrap();
        scope.write_bytes(b"metadata").unwrap();
        scope.commit().unwrap();
        assert_eq!(storage.read_record(0).unwrap(), b"metadata");
    }

    #[test]
    fn test_leaked_scope_is_concurrent_access() {
        let mut storage = new_storage();
        let scope = storage.enter_add_scope().unwrap();
        std::mem::forget(scope);
        assert!(matches!(
            storage.enter_add_scope(),
            Err(StorageError::ConcurrentAccess { .. })
        ));
    }

    #[test]
    fn test_corrupt_header_rejected_on_open() {
        let storage = new_storage();
        let mut bytes = storage.into_stream().into_inner();
        bytes[0] = b'X'; // stomp magic
        let result = ClusteredStorage::open(Cursor::new(bytes), &small_config());
        assert!(result.is_err());
    }

    #[test]
    fn test_truncated_stream_rejected_on_open() {
        let storage = new_storage();
        let bytes = storage.into_stream().into_inner();
        let result = ClusteredStorage::open(
            Cursor::new(bytes[..HEADER_SIZE / 2].to_vec()),
            &small_config(),
        );
        assert!(matches!(result, Err(StorageError::CorruptStorage(_))));
    }

    #[test]
    fn test_key_lookup_without_value_read() {
        let config = small_config().with_key_size(8);
        let mut storage = ClusteredStorage::create(Cursor::new(Vec::new()), &config).unwrap();

        let mut scope = storage.enter_add_scope().unwrap();
        scope.set_key(b"alpha").unwrap();
        scope.write_bytes(b"value-a").unwrap();
        let a = scope.commit().unwrap();

        let mut scope = storage.enter_add_scope().unwrap();
        scope.set_key(b"beta").unwrap();
        scope.write_bytes(b"value-b").unwrap();
        scope.commit().unwrap();

        assert_eq!(storage.find_by_key(b"alpha").unwrap(), Some(a));
        assert_eq!(storage.find_by_key(b"missing").unwrap(), None);
        assert!(matches!(
            storage.find_by_key(b"way-too-long-key"),
            Err(StorageError::KeyTooLarge { .. })
        ));
    }
}
