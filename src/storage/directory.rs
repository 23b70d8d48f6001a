//! Record directory: the table mapping record indices to cluster chains.
//!
//! Entries carry the chain head, the logical byte length and an optional
//! fixed-width key blob so key-based lookups never touch cluster data. The
//! directory itself is held in a [`BoundedList`] (logical count over a
//! fixed slot table) and persisted as a varint-encoded record chain whose
//! head lives in the storage header.

use crate::bounded::{BoundedList, VecStore};
use crate::config::INITIAL_RECORD_CAPACITY;
use crate::error::{Result, StorageError};
use crate::header::NIL_CLUSTER;
use crate::varint::{decode_varint, encode_varint};

const FLAG_TOMBSTONE: u8 = 0b0000_0001;

/// One slot of the record directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Head of the record's cluster chain, or [`NIL_CLUSTER`] for an empty
    /// record.
    pub first_cluster: u64,

    /// Logical byte length of the record.
    pub length: u64,

    /// Reaped slot: chain freed, eligible for reuse by a later add.
    pub tombstone: bool,

    /// Fixed-width key blob (exactly `key_size` bytes, zero-filled).
    pub key: Vec<u8>,
}

impl Default for DirectoryEntry {
    fn default() -> Self {
        DirectoryEntry {
            first_cluster: NIL_CLUSTER,
            length: 0,
            tombstone: false,
            key: Vec::new(),
        }
    }
}

impl DirectoryEntry {
    pub fn empty(key_size: u16) -> Self {
        DirectoryEntry {
            first_cluster: NIL_CLUSTER,
            length: 0,
            tombstone: false,
            key: vec![0u8; key_size as usize],
        }
    }

    pub fn tombstone(key_size: u16) -> Self {
        DirectoryEntry {
            tombstone: true,
            ..Self::empty(key_size)
        }
    }

    /// Slot holds live data (possibly a zero-length record).
    pub fn is_live(&self) -> bool {
        !self.tombstone
    }

    pub fn has_chain(&self) -> bool {
        self.first_cluster != NIL_CLUSTER
    }
}

/// In-memory record directory with explicit chunked growth.
#[derive(Debug)]
pub struct Directory {
    entries: BoundedList<DirectoryEntry, VecStore<DirectoryEntry>>,
    key_size: u16,
    max_records: usize,
}

impl Directory {
    pub fn new(key_size: u16, max_records: usize) -> Self {
        let capacity = INITIAL_RECORD_CAPACITY.min(max_records);
        Directory {
            entries: BoundedList::new(VecStore::new(capacity)),
            key_size,
            max_records,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn key_size(&self) -> u16 {
        self.key_size
    }

    pub fn get(&self, index: usize) -> Result<DirectoryEntry> {
        self.entries.get(index)
    }

    pub fn set(&mut self, index: usize, entry: DirectoryEntry) -> Result<()> {
        self.check_key(&entry)?;
        self.entries.set(index, entry)
    }

    /// Append a slot, growing the table (doubling, capped at `max_records`).
    pub fn push(&mut self, entry: DirectoryEntry) -> Result<usize> {
        self.check_key(&entry)?;
        self.ensure_room()?;
        let index = self.entries.count();
        self.entries.add(entry)?;
        Ok(index)
    }

    pub fn insert(&mut self, index: usize, entry: DirectoryEntry) -> Result<()> {
        self.check_key(&entry)?;
        self.ensure_room()?;
        self.entries.insert(index, entry)
    }

    pub fn remove_at(&mut self, index: usize) -> Result<DirectoryEntry> {
        self.entries.remove_at(index)
    }

    /// First tombstoned slot at or after `start`, if any.
    pub fn find_tombstone(&self, start: usize) -> Option<usize> {
        (start..self.len()).find(|&i| {
            self.entries
                .get(i)
                .map(|e| e.tombstone)
                .unwrap_or(false)
        })
    }

    /// First live slot at or after `start` whose key equals `key`.
    pub fn find_by_key(&self, key: &[u8], start: usize) -> Option<usize> {
        (start..self.len()).find(|&i| {
            self.entries
                .get(i)
                .map(|e| e.is_live() && e.key == key)
                .unwrap_or(false)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = DirectoryEntry> + '_ {
        self.entries.iter()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_varint(&mut buf, self.len() as u64);
        for entry in self.entries.iter() {
            let mut flags = 0u8;
            if entry.tombstone {
                flags |= FLAG_TOMBSTONE;
            }
            buf.push(flags);
            encode_varint(&mut buf, entry.first_cluster);
            encode_varint(&mut buf, entry.length);
            buf.extend_from_slice(&entry.key);
        }
        buf
    }

    pub fn decode(bytes: &[u8], key_size: u16, max_records: usize) -> Result<Self> {
        let mut pos = 0;
        let count = decode_varint(bytes, &mut pos)? as usize;
        if count > max_records {
            return Err(StorageError::CorruptStorage(format!(
                "directory claims {} records (cap {})",
                count, max_records
            )));
        }

        let capacity = count.max(INITIAL_RECORD_CAPACITY).min(max_records.max(count));
        let mut entries = BoundedList::new(VecStore::new(capacity));
        for _ in 0..count {
            if pos >= bytes.len() {
                return Err(StorageError::CorruptData(
                    "directory truncated mid-entry".into(),
                ));
            }
            let flags = bytes[pos];
            pos += 1;
            let first_cluster = decode_varint(bytes, &mut pos)?;
            let length = decode_varint(bytes, &mut pos)?;
            let key_end = pos + key_size as usize;
            if key_end > bytes.len() {
                return Err(StorageError::CorruptData(
                    "directory truncated inside key blob".into(),
                ));
            }
            let key = bytes[pos..key_end].to_vec();
            pos = key_end;

            let tombstone = flags & FLAG_TOMBSTONE != 0;
            if tombstone && first_cluster != NIL_CLUSTER {
                return Err(StorageError::CorruptStorage(format!(
                    "tombstoned entry still references cluster {}",
                    first_cluster
                )));
            }
            entries.add(DirectoryEntry {
                first_cluster,
                length,
                tombstone,
                key,
            })?;
        }
        if pos != bytes.len() {
            return Err(StorageError::CorruptData(format!(
                "{} trailing bytes after directory",
                bytes.len() - pos
            )));
        }

        Ok(Directory {
            entries,
            key_size,
            max_records,
        })
    }

    fn ensure_room(&mut self) -> Result<()> {
        if self.entries.count() < self.entries.capacity() {
            return Ok(());
        }
        let grown = (self.entries.capacity() * 2)
            .max(INITIAL_RECORD_CAPACITY)
            .min(self.max_records);
        self.entries.grow(grown);
        if self.entries.count() >= self.entries.capacity() {
            return Err(StorageError::CapacityExceeded {
                needed: self.entries.count() + 1,
                available: self.max_records,
            });
        }
        Ok(())
    }

    fn check_key(&self, entry: &DirectoryEntry) -> Result<()> {
        if entry.key.len() != self.key_size as usize {
            return Err(StorageError::KeyTooLarge {
                len: entry.key.len(),
                max: self.key_size as usize,
            });
        }
        Ok(())
    }
}
