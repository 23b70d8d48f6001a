//! Merklefile Clustered Storage
//!
//! A single-file storage engine mapping logical collections onto one byte
//! stream, with an authenticated Merkle tree maintained over their items.
//!
//! ## Features
//!
//! - **Fixed-size clusters** chained through embedded next-pointers
//! - **Record directory** with fixed-width keys for O(n) keyed lookup
//!   without touching cluster data
//! - **Intrusive free list** threaded through freed clusters, so space is
//!   reclaimed without a separate allocation map
//! - **List / dict / set collections** layered over the same record API
//! - **SHA-256 Merkle tree** per collection, snapshotted into a reserved
//!   record after every mutation for tamper evidence across reopens
//! - **CRC-protected header** and full structural audit on open
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use merklefile::{
//!     BincodeSerializer, ClusteredStorage, MerkleList, Sha256Hasher, StorageConfig,
//! };
//! use std::io::Cursor;
//!
//! let config = StorageConfig::default();
//! let storage = ClusteredStorage::create(Cursor::new(Vec::new()), &config).unwrap();
//!
//! let mut list = MerkleList::create(storage, BincodeSerializer, Sha256Hasher).unwrap();
//! list.add(&"hello".to_string()).unwrap();
//! list.add(&"world".to_string()).unwrap();
//!
//! let root = list.root();
//! println!("merkle root: {}", hex_string(&root));
//! list.verify().unwrap();
//!
//! fn hex_string(bytes: &[u8]) -> String {
//!     bytes.iter().map(|b| format!("{:02x}", b)).collect()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Merklefile Byte Stream           │
//! ├─────────────────────────────────────────────┤
//! │ Header (256 bytes)                          │
//! │  - Magic: "MFIL\x00\x01\x00\x00"            │
//! │  - Cluster size, key width, CRC-32          │
//! │  - Free-list head, directory chain head     │
//! ├─────────────────────────────────────────────┤
//! │ Cluster 0..N (fixed size)                   │
//! │  - [next: u64 LE][payload]                  │
//! │  - Record chains (directory, records)       │
//! │  - Freed clusters threaded into free list   │
//! ├─────────────────────────────────────────────┤
//! │ Reserved record 0                           │
//! │  - Merkle tree snapshot (leaves + root)     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`storage`] - The clustered storage engine and record write scopes
//! - [`collections`] - Plain list, dictionary, and set adapters
//! - [`merkle`] - Merkle tree and authenticated collection adapters
//! - [`bounded`] - Bounded in-memory list backing the record directory
//! - [`varint`] - Compact-size variable-length integer codec

pub mod bounded;
pub mod collections;
pub mod config;
pub mod error;
pub mod hash;
pub mod header;
pub mod merkle;
pub mod serializer;
pub mod storage;
pub mod varint;

// Re-export commonly used types
pub use bounded::{BoundedList, SlotStore, VecStore};
pub use collections::{StreamDict, StreamList, StreamSet};
pub use config::StorageConfig;
pub use error::{Result, StorageError};
pub use hash::{ItemHasher, Sha256Hasher};
pub use header::{StorageHeader, HEADER_SIZE, MIN_CLUSTER_SIZE, NIL_CLUSTER};
pub use merkle::{FlatMerkleTree, MerkleDict, MerkleList, MerkleSet};
pub use serializer::{BincodeSerializer, ItemSerializer};
pub use storage::{ClusteredStorage, RecordScope, StorageStats};

/// Storage format version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Storage format magic number
pub const MAGIC: &[u8; 8] = &header::MAGIC;
