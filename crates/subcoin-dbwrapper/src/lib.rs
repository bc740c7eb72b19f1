//! # Subcoin DB Wrapper
//!
//! Transactional key-value storage for the node's chain state.
//!
//! - [`Database`]: RocksDB-backed store with XOR value obfuscation, atomic [`Batch`] writes
//!   and snapshot iteration.
//! - [`DbTransaction`]: in-memory overlay of pending writes and deletes that can be stacked
//!   on the database or on another overlay and committed one level down.
//! - [`TransactionIterator`]: sorted view merging an overlay's pending writes with its parent.
//!
//! Keys are encoded with [`KeyEncode`] into byte strings whose lexicographic order is the
//! iteration order, values are serialized with bincode.

mod batch;
mod codec;
mod database;
mod error;
mod iterator;
mod notifications;
mod options;
mod transaction;
mod view;

pub use self::batch::Batch;
pub use self::codec::{
    DbValue, KeyDecode, KeyEncode, PREALLOC_KEY_SIZE, decode_value, encode_value, value_size,
};
pub use self::database::{Database, OBFUSCATE_KEY_KEY, OBFUSCATE_KEY_NUM_BYTES};
pub use self::error::Error;
pub use self::iterator::DbIterator;
pub use self::notifications::KernelNotifications;
#[cfg(feature = "cli")]
pub use self::options::DatabaseParams;
pub use self::options::{DEFAULT_CACHE_BYTES, DbOptions, DbParams, DbParamsBuilder};
pub use self::transaction::{Changes, DbTransaction, HeldValue, TransactionIterator};
pub use self::view::{CommitTarget, Entries, StoreIterator, StoreView};

/// Database result type.
pub type Result<T> = std::result::Result<T, Error>;
