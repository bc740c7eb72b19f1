//! Capabilities shared by the base store and the transaction overlays.
//!
//! A [`crate::DbTransaction`] is generic over any parent implementing [`StoreView`] and
//! [`CommitTarget`], which is what allows overlays to be stacked on top of each other.

use crate::codec::{DbValue, KeyDecode, KeyEncode};
use crate::transaction::Changes;
use crate::{Error, Result};
use std::marker::PhantomData;

/// Read access to a key-value store using already encoded keys.
pub trait StoreView {
    /// Forward iterator over the store.
    type Iterator<'a>: StoreIterator
    where
        Self: 'a;

    /// Returns the value stored under `key`, or `None` if the key is absent.
    fn read_encoded<V: DbValue>(&self, key: &[u8]) -> Result<Option<V>>;

    /// Returns `true` if `key` is present.
    fn exists_encoded(&self, key: &[u8]) -> Result<bool>;

    /// Creates an iterator positioned before the first entry.
    fn new_iterator(&self) -> Self::Iterator<'_>;
}

/// Destination of an overlay commit.
pub trait CommitTarget {
    /// Applies all deletes and then all writes of `changes`.
    fn commit_changes(&mut self, changes: Changes) -> Result<()>;
}

/// Forward-only cursor over the entries of a store, in ascending key order.
///
/// A freshly created iterator is not positioned, call [`StoreIterator::seek_to_first`] or
/// [`StoreIterator::seek`] first.
pub trait StoreIterator {
    /// Returns `true` if the iterator is positioned at an entry.
    fn valid(&self) -> bool;

    /// Positions the iterator at the first entry.
    fn seek_to_first(&mut self);

    /// Positions the iterator at the first entry whose key is `>=` the encoded `key`.
    fn seek_encoded(&mut self, key: &[u8]);

    /// Advances to the next entry.
    fn next(&mut self);

    /// Encoded key of the current entry.
    fn raw_key(&self) -> Option<&[u8]>;

    /// Decodes the value of the current entry.
    ///
    /// A malformed value fails this call only, the iterator keeps its position.
    fn value<V: DbValue>(&self) -> Result<V>;

    /// Returns the error that stopped the iterator, if any.
    ///
    /// An iterator that is no longer [`StoreIterator::valid`] either reached the end of the
    /// data or hit a read error, this tells the two apart.
    fn status(&self) -> Result<()> {
        Ok(())
    }

    /// Positions the iterator at the first entry whose key is `>=` `key`.
    fn seek<K: KeyEncode + ?Sized>(&mut self, key: &K) {
        self.seek_encoded(&key.key_bytes())
    }

    /// Decodes the key of the current entry.
    fn key<K: KeyDecode>(&self) -> Result<K> {
        let raw = self.raw_key().ok_or(Error::InvalidIterator)?;
        K::from_key_bytes(raw)
    }

    /// Turns the cursor into an [`Iterator`] of decoded entries starting at the current position.
    fn entries<K: KeyDecode, V: DbValue>(self) -> Entries<Self, K, V>
    where
        Self: Sized,
    {
        Entries {
            inner: self,
            _phantom: PhantomData,
        }
    }
}

/// Iterator adapter yielding decoded `(key, value)` pairs.
///
/// See [`StoreIterator::entries`].
pub struct Entries<I, K, V> {
    inner: I,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<I: StoreIterator, K: KeyDecode, V: DbValue> Iterator for Entries<I, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.inner.valid() {
            return None;
        }
        let entry = self
            .inner
            .key::<K>()
            .and_then(|key| Ok((key, self.inner.value::<V>()?)));
        self.inner.next();
        Some(entry)
    }
}

impl<T: StoreView> StoreView for &T {
    type Iterator<'a>
        = T::Iterator<'a>
    where
        Self: 'a;

    fn read_encoded<V: DbValue>(&self, key: &[u8]) -> Result<Option<V>> {
        (**self).read_encoded(key)
    }

    fn exists_encoded(&self, key: &[u8]) -> Result<bool> {
        (**self).exists_encoded(key)
    }

    fn new_iterator(&self) -> Self::Iterator<'_> {
        (**self).new_iterator()
    }
}

impl<T: StoreView> StoreView for &mut T {
    type Iterator<'a>
        = T::Iterator<'a>
    where
        Self: 'a;

    fn read_encoded<V: DbValue>(&self, key: &[u8]) -> Result<Option<V>> {
        (**self).read_encoded(key)
    }

    fn exists_encoded(&self, key: &[u8]) -> Result<bool> {
        (**self).exists_encoded(key)
    }

    fn new_iterator(&self) -> Self::Iterator<'_> {
        (**self).new_iterator()
    }
}

impl<T: CommitTarget> CommitTarget for &mut T {
    fn commit_changes(&mut self, changes: Changes) -> Result<()> {
        (**self).commit_changes(changes)
    }
}
