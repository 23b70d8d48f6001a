//! Stream-mapped collections: standard collection surfaces over
//! [`ClusteredStorage`](crate::storage::ClusteredStorage).

pub mod dict;
pub mod list;
pub mod set;

pub use dict::StreamDict;
pub use list::StreamList;
pub use set::StreamSet;
