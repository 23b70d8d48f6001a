//! Merkle-authenticated collection adapters.
//!
//! Each adapter wraps a plain collection and maintains a [`FlatMerkleTree`]
//! whose leaves mirror the collection's slots, persisting an encoded
//! snapshot of the tree into reserved record 0 after every mutation.

pub mod dict;
pub mod list;
pub mod set;
pub mod tree;

pub use dict::MerkleDict;
pub use list::MerkleList;
pub use set::MerkleSet;
pub use tree::FlatMerkleTree;
