//! Pluggable item serialization.
//!
//! The storage engine is serializer-agnostic: collections are handed a
//! `Serialize`/`Deserialize` pair per instantiation. Compression or
//! encryption belong in decorators implementing this same trait.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Byte-level codec for collection items.
pub trait ItemSerializer<T> {
    fn serialize(&self, item: &T) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<T>;
}

/// Default serializer backed by bincode.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl<T: Serialize + DeserializeOwned> ItemSerializer<T> for BincodeSerializer {
    fn serialize(&self, item: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(item)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }
}
