//! Creation-time storage options.

use crate::error::{Result, StorageError};
use crate::header::MIN_CLUSTER_SIZE;

/// Default cluster size in bytes.
pub const DEFAULT_CLUSTER_SIZE: u32 = 4096;
/// Default number of clusters the read cache holds.
pub const DEFAULT_CACHE_CLUSTERS: usize = 256;
/// Safety cap on directory growth (prevents runaway record tables).
pub const DEFAULT_MAX_RECORDS: usize = 10_000_000;
/// Initial directory slot capacity; doubled on demand up to the cap.
pub const INITIAL_RECORD_CAPACITY: usize = 16;

/// Options fixed when a storage instance is created.
///
/// `cluster_size`, `key_size` and `reserved_records` are persisted in the
/// header and immutable afterwards; the cache size and record cap are
/// runtime tuning knobs re-supplied on open.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub cluster_size: u32,
    pub key_size: u16,
    pub reserved_records: u32,
    pub cache_clusters: usize,
    pub max_records: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            cluster_size: DEFAULT_CLUSTER_SIZE,
            key_size: 0,
            reserved_records: 1,
            cache_clusters: DEFAULT_CACHE_CLUSTERS,
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

impl StorageConfig {
    pub fn with_cluster_size(mut self, cluster_size: u32) -> Self {
        self.cluster_size = cluster_size;
        self
    }

    pub fn with_key_size(mut self, key_size: u16) -> Self {
        self.key_size = key_size;
        self
    }

    pub fn with_reserved_records(mut self, reserved_records: u32) -> Self {
        self.reserved_records = reserved_records;
        self
    }

    pub fn with_cache_clusters(mut self, cache_clusters: usize) -> Self {
        self.cache_clusters = cache_clusters;
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster_size < MIN_CLUSTER_SIZE {
            return Err(StorageError::InvalidClusterSize(self.cluster_size));
        }
        if self.max_records == 0 {
            return Err(StorageError::PreconditionViolation(
                "max_records must be nonzero",
            ));
        }
        if (self.reserved_records as usize) > self.max_records {
            return Err(StorageError::PreconditionViolation(
                "reserved_records exceeds max_records",
            ));
        }
        Ok(())
    }
}
