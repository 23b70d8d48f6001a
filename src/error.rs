use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid magic number in header")]
    InvalidMagic,

    #[error("Unsupported format version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Invalid cluster size: {0}")]
    InvalidClusterSize(u32),

    #[error("Storage structure corrupt: {0}")]
    CorruptStorage(String),

    #[error("Record data corrupt: {0}")]
    CorruptData(String),

    #[error("Capacity exceeded: needed {needed}, available {available}")]
    CapacityExceeded { needed: usize, available: usize },

    #[error("Concurrent access to record {record}")]
    ConcurrentAccess { record: u64 },

    #[error("Precondition violated: {0}")]
    PreconditionViolation(&'static str),

    #[error("Index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Key too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
