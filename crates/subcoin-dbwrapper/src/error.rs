//! Error types for the database wrapper.

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// RocksDB error.
    ///
    /// When returned from a write path the store can no longer be trusted and
    /// the caller is expected to shut down.
    #[error("RocksDB error: {0}")]
    Rocksdb(#[from] rocksdb::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored bytes could not be decoded into the requested type.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A pending overlay write is read back with a different type than it was written with.
    #[error("Read called with {found} but {key} was written as {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Accessor called on an iterator that is not positioned at an entry.
    #[error("Iterator is not positioned at a valid entry")]
    InvalidIterator,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}
