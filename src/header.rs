//! On-disk storage header.
//!
//! The header occupies the first [`HEADER_SIZE`] bytes of the stream and is
//! the root of trust for everything else: cluster geometry, free-list head,
//! and the directory chain pointer all live here. The layout is fixed
//! little-endian and terminated by a CRC32 so a torn header write is caught
//! on open.

use crate::error::{Result, StorageError};

pub const MAGIC: [u8; 8] = *b"MFIL\x00\x01\x00\x00";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;

/// Fixed size of the header region at the start of the stream.
pub const HEADER_SIZE: usize = 256;

/// Smallest permitted cluster: envelope plus a useful payload.
pub const MIN_CLUSTER_SIZE: u32 = 32;

/// Nil cluster pointer (end of chain / empty record).
pub const NIL_CLUSTER: u64 = u64::MAX;

const CRC_OFFSET: usize = 70;

/// Storage header (bytes `[0, HEADER_SIZE)` of the stream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageHeader {
    pub magic: [u8; 8],
    pub version_major: u16,
    pub version_minor: u16,

    /// Cluster size in bytes, fixed for the lifetime of the storage.
    pub cluster_size: u32,

    /// Fixed width of record key blobs (0 for keyless storage).
    pub key_size: u16,

    /// Low record slots set aside for engine/application metadata.
    pub reserved_records: u32,

    /// Clusters currently present in the cluster region.
    pub total_clusters: u64,

    /// Clusters on the free list.
    pub free_clusters: u64,

    /// First free cluster, or [`NIL_CLUSTER`].
    pub freelist_head: u64,

    /// First cluster of the persisted record directory, or [`NIL_CLUSTER`].
    pub directory_head: u64,

    /// Byte length of the persisted record directory.
    pub directory_len: u64,

    /// Number of directory entries (including reserved slots).
    pub record_count: u64,
}

impl StorageHeader {
    pub fn new(cluster_size: u32, key_size: u16, reserved_records: u32) -> Self {
        StorageHeader {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            cluster_size,
            key_size,
            reserved_records,
            total_clusters: 0,
            free_clusters: 0,
            freelist_head: NIL_CLUSTER,
            directory_head: NIL_CLUSTER,
            directory_len: 0,
            record_count: 0,
        }
    }

    /// Validate structural invariants. Corruption here is fatal; no repair
    /// is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(StorageError::InvalidMagic);
        }
        if self.version_major != VERSION_MAJOR || self.version_minor != VERSION_MINOR {
            return Err(StorageError::UnsupportedVersion {
                major: self.version_major,
                minor: self.version_minor,
            });
        }
        if self.cluster_size < MIN_CLUSTER_SIZE {
            return Err(StorageError::InvalidClusterSize(self.cluster_size));
        }
        if self.free_clusters > self.total_clusters {
            return Err(StorageError::CorruptStorage(format!(
                "free clusters ({}) exceed total clusters ({})",
                self.free_clusters, self.total_clusters
            )));
        }
        for (name, pointer) in [
            ("freelist head", self.freelist_head),
            ("directory head", self.directory_head),
        ] {
            if pointer != NIL_CLUSTER && pointer >= self.total_clusters {
                return Err(StorageError::CorruptStorage(format!(
                    "{} {} beyond cluster region ({})",
                    name, pointer, self.total_clusters
                )));
            }
        }
        if self.record_count < self.reserved_records as u64 {
            return Err(StorageError::CorruptStorage(format!(
                "record count ({}) below reserved region ({})",
                self.record_count, self.reserved_records
            )));
        }
        Ok(())
    }

    /// Payload bytes per cluster (cluster minus the next-pointer envelope).
    pub fn payload_size(&self) -> usize {
        self.cluster_size as usize - 8
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);
        bytes.extend_from_slice(&self.magic);
        bytes.extend_from_slice(&self.version_major.to_le_bytes());
        bytes.extend_from_slice(&self.version_minor.to_le_bytes());
        bytes.extend_from_slice(&self.cluster_size.to_le_bytes());
        bytes.extend_from_slice(&self.key_size.to_le_bytes());
        bytes.extend_from_slice(&self.reserved_records.to_le_bytes());
        bytes.extend_from_slice(&self.total_clusters.to_le_bytes());
        bytes.extend_from_slice(&self.free_clusters.to_le_bytes());
        bytes.extend_from_slice(&self.freelist_head.to_le_bytes());
        bytes.extend_from_slice(&self.directory_head.to_le_bytes());
        bytes.extend_from_slice(&self.directory_len.to_le_bytes());
        bytes.extend_from_slice(&self.record_count.to_le_bytes());
        debug_assert_eq!(bytes.len(), CRC_OFFSET);

        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.resize(HEADER_SIZE, 0);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StorageError::CorruptStorage(format!(
                "header truncated: {} bytes (expected {})",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let stored_crc = u32::from_le_bytes(
            bytes[CRC_OFFSET..CRC_OFFSET + 4]
                .try_into()
                .expect("4-byte slice"),
        );
        let computed_crc = crc32fast::hash(&bytes[..CRC_OFFSET]);
        if stored_crc != computed_crc {
            return Err(StorageError::CorruptStorage(format!(
                "header checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, computed_crc
            )));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        let header = StorageHeader {
            magic,
            version_major: u16::from_le_bytes([bytes[8], bytes[9]]),
            version_minor: u16::from_le_bytes([bytes[10], bytes[11]]),
            cluster_size: u32::from_le_bytes(bytes[12..16].try_into().expect("4-byte slice")),
            key_size: u16::from_le_bytes([bytes[16], bytes[17]]),
            reserved_records: u32::from_le_bytes(bytes[18..22].try_into().expect("4-byte slice")),
            total_clusters: u64::from_le_bytes(bytes[22..30].try_into().expect("8-byte slice")),
            free_clusters: u64::from_le_bytes(bytes[30..38].try_into().expect("8-byte slice")),
            freelist_head: u64::from_le_bytes(bytes[38..46].try_into().expect("8-byte slice")),
            directory_head: u64::from_le_bytes(bytes[46..54].try_into().expect("8-byte slice")),
            directory_len: u64::from_le_bytes(bytes[54..62].try_into().expect("8-byte slice")),
            record_count: u64::from_le_bytes(bytes[62..70].try_into().expect("8-byte slice")),
        };

        header.validate()?;
        Ok(header)
    }
}
