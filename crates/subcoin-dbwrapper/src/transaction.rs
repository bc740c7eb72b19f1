//! In-memory transaction overlay.
//!
//! A [`DbTransaction`] buffers writes and deletes on top of a parent store. The parent is
//! either the [`crate::Database`] itself or another overlay, so overlays can be stacked to any
//! depth:
//!
//! ```no_run
//! # use subcoin_dbwrapper::{Database, DbParams, DbTransaction};
//! # fn run() -> subcoin_dbwrapper::Result<()> {
//! let db = Database::open(&DbParams::new("/tmp/evodb"))?;
//! let mut block_tx = DbTransaction::new(&db);
//! {
//!     let mut quorum_tx = DbTransaction::new(&mut block_tx);
//!     quorum_tx.write(&(b'q', 1u32), vec![1u8, 2, 3]);
//!     quorum_tx.commit()?;
//! }
//! // Only this commit hits the disk.
//! block_tx.commit()?;
//! # Ok(())
//! # }
//! ```
//!
//! Pending values are held type-erased with their original type, reading a pending value
//! back with another type fails with [`Error::TypeMismatch`].

mod iterator;

pub use self::iterator::TransactionIterator;

use crate::codec::{DbValue, KeyEncode, encode_value, value_size};
use crate::view::{CommitTarget, StoreView};
use crate::{Error, Result};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

trait ErasedValue: Any + Send + Sync {
    fn encode(&self) -> Result<Vec<u8>>;

    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str;
}

impl<V: DbValue> ErasedValue for V {
    fn encode(&self) -> Result<Vec<u8>> {
        encode_value(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<V>()
    }
}

/// Pending value of an overlay, stored with its original type.
pub struct HeldValue {
    value: Box<dyn ErasedValue>,
    size: usize,
}

impl HeldValue {
    fn new<V: DbValue>(value: V) -> Self {
        let size = value_size(&value);
        Self {
            value: Box::new(value),
            size,
        }
    }

    /// Serializes the held value.
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.value.encode()
    }

    /// Serialized size of the held value.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Name of the type the value was written with.
    pub fn type_name(&self) -> &'static str {
        self.value.type_name()
    }

    fn downcast_ref<V: DbValue>(&self) -> Option<&V> {
        self.value.as_any().downcast_ref::<V>()
    }
}

impl std::fmt::Debug for HeldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeldValue")
            .field("type", &self.type_name())
            .field("size", &self.size)
            .finish()
    }
}

/// Pending changes of an overlay handed to its [`CommitTarget`].
///
/// Deletes are applied before writes.
#[derive(Debug, Default)]
pub struct Changes {
    deletes: BTreeSet<Vec<u8>>,
    writes: BTreeMap<Vec<u8>, HeldValue>,
}

impl Changes {
    /// Encoded keys to delete.
    pub fn deletes(&self) -> &BTreeSet<Vec<u8>> {
        &self.deletes
    }

    /// Encoded keys and the values to write under them.
    pub fn writes(&self) -> &BTreeMap<Vec<u8>, HeldValue> {
        &self.writes
    }

    /// Returns `true` if there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.writes.is_empty()
    }

    /// Splits the changes into deletes and writes.
    pub fn into_parts(self) -> (BTreeSet<Vec<u8>>, BTreeMap<Vec<u8>, HeldValue>) {
        (self.deletes, self.writes)
    }
}

/// Layered in-memory view of pending writes and deletes over a parent store.
///
/// Not thread-safe: an overlay is owned by a single unit of work until it is committed or
/// dropped. Dropping an overlay discards its pending changes.
pub struct DbTransaction<P> {
    parent: P,
    writes: BTreeMap<Vec<u8>, HeldValue>,
    deletes: BTreeSet<Vec<u8>>,
    /// Signed so that accounting bugs show up as a negative total instead of wrapping.
    memory_usage: i64,
    warned_negative_usage: AtomicBool,
}

impl<P> DbTransaction<P> {
    /// Create an empty overlay on top of `parent`.
    pub fn new(parent: P) -> Self {
        Self {
            parent,
            writes: BTreeMap::new(),
            deletes: BTreeSet::new(),
            memory_usage: 0,
            warned_negative_usage: AtomicBool::new(false),
        }
    }

    /// Buffer a write of `value` under `key`.
    ///
    /// Replaces any pending write or delete of the same key, including a pending write of a
    /// different type.
    pub fn write<K, V>(&mut self, key: &K, value: V)
    where
        K: KeyEncode + ?Sized,
        V: DbValue,
    {
        self.write_held(key.key_bytes(), HeldValue::new(value));
    }

    fn write_held(&mut self, key: Vec<u8>, value: HeldValue) {
        let key_size = key.len() as i64;

        if self.deletes.remove(&key) {
            self.memory_usage -= key_size;
        }

        self.memory_usage += key_size + value.size as i64;
        if let Some(old) = self.writes.insert(key, value) {
            self.memory_usage -= key_size + old.size as i64;
        }
    }

    /// Buffer the removal of `key`.
    pub fn erase<K: KeyEncode + ?Sized>(&mut self, key: &K) {
        self.erase_encoded(key.key_bytes());
    }

    fn erase_encoded(&mut self, key: Vec<u8>) {
        let key_size = key.len() as i64;

        if let Some(old) = self.writes.remove(&key) {
            self.memory_usage -= key_size + old.size as i64;
        }

        if self.deletes.insert(key) {
            self.memory_usage += key_size;
        }
    }

    /// Discard all pending changes.
    pub fn clear(&mut self) {
        self.writes.clear();
        self.deletes.clear();
        self.memory_usage = 0;
    }

    /// Returns `true` if there are no pending changes.
    pub fn is_clean(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }

    /// Approximate memory held by the pending changes, in bytes.
    pub fn memory_usage(&self) -> usize {
        if self.memory_usage < 0 {
            if !self.warned_negative_usage.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    "Negative overlay memory usage ({}), clamping to zero",
                    self.memory_usage
                );
            }
            return 0;
        }
        self.memory_usage as usize
    }

    /// Returns a reference to the parent store.
    pub fn parent(&self) -> &P {
        &self.parent
    }

    /// Drops the pending changes and returns the parent store.
    pub fn into_parent(self) -> P {
        self.parent
    }

    /// Apply all deletes and then all writes to `target` instead of the parent, leaving this
    /// overlay clean.
    ///
    /// Committing into a [`crate::Batch`] lets the caller pick the sync mode of the final
    /// [`crate::Database::write_batch`].
    pub fn commit_to<T: CommitTarget + ?Sized>(&mut self, target: &mut T) -> Result<()> {
        if self.is_clean() {
            return Ok(());
        }
        let changes = self.take_changes();
        target.commit_changes(changes)
    }

    fn take_changes(&mut self) -> Changes {
        self.memory_usage = 0;
        Changes {
            deletes: std::mem::take(&mut self.deletes),
            writes: std::mem::take(&mut self.writes),
        }
    }
}

impl<P: StoreView> DbTransaction<P> {
    /// Read the value of `key` as seen through this overlay.
    pub fn read<K, V>(&self, key: &K) -> Result<Option<V>>
    where
        K: KeyEncode + ?Sized,
        V: DbValue,
    {
        self.read_encoded(&key.key_bytes())
    }

    /// Returns `true` if `key` is present as seen through this overlay.
    pub fn exists<K: KeyEncode + ?Sized>(&self, key: &K) -> Result<bool> {
        self.exists_encoded(&key.key_bytes())
    }

    /// Creates a merging iterator over the pending writes and the parent store.
    pub fn iter(&self) -> TransactionIterator<'_, P> {
        TransactionIterator::new(self, self.parent.new_iterator())
    }
}

impl<P: CommitTarget> DbTransaction<P> {
    /// Apply all deletes and then all writes to the parent, leaving this overlay clean.
    ///
    /// Only a commit into the [`crate::Database`] performs I/O, committing into another
    /// overlay moves the pending changes one level down. The pending changes are consumed
    /// even if the parent fails to apply them.
    pub fn commit(&mut self) -> Result<()> {
        if self.is_clean() {
            return Ok(());
        }
        let changes = self.take_changes();
        self.parent.commit_changes(changes)
    }
}

impl<P: StoreView> StoreView for DbTransaction<P> {
    type Iterator<'a>
        = TransactionIterator<'a, P>
    where
        Self: 'a;

    fn read_encoded<V: DbValue>(&self, key: &[u8]) -> Result<Option<V>> {
        if self.deletes.contains(key) {
            return Ok(None);
        }

        if let Some(held) = self.writes.get(key) {
            return match held.downcast_ref::<V>() {
                Some(value) => Ok(Some(value.clone())),
                None => {
                    let expected = held.type_name();
                    let found = std::any::type_name::<V>();
                    tracing::error!(
                        "Overlay read of {} as {found}, but it was written as {expected}",
                        hex::encode(key)
                    );
                    Err(Error::TypeMismatch {
                        key: hex::encode(key),
                        expected,
                        found,
                    })
                }
            };
        }

        self.parent.read_encoded(key)
    }

    fn exists_encoded(&self, key: &[u8]) -> Result<bool> {
        if self.deletes.contains(key) {
            return Ok(false);
        }
        if self.writes.contains_key(key) {
            return Ok(true);
        }
        self.parent.exists_encoded(key)
    }

    fn new_iterator(&self) -> Self::Iterator<'_> {
        self.iter()
    }
}

impl<P> CommitTarget for DbTransaction<P> {
    fn commit_changes(&mut self, changes: Changes) -> Result<()> {
        let (deletes, writes) = changes.into_parts();
        for key in deletes {
            self.erase_encoded(key);
        }
        for (key, value) in writes {
            self.write_held(key, value);
        }
        Ok(())
    }
}
