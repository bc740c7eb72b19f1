use super::DbTransaction;
use crate::codec::DbValue;
use crate::view::{StoreIterator, StoreView};
use crate::{Error, Result};
use std::ops::Bound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Current {
    Transaction,
    Parent,
    None,
}

/// Iterator merging the pending writes of a [`DbTransaction`] with its parent's iterator.
///
/// Parent entries that are deleted or overwritten in the transaction are skipped, so every
/// key is yielded at most once and always with the value visible through the transaction.
/// Pending writes are read from the transaction as it was when iteration started.
pub struct TransactionIterator<'a, P: StoreView + 'a> {
    transaction: &'a DbTransaction<P>,
    write_key: Option<&'a [u8]>,
    parent: P::Iterator<'a>,
    current: Current,
}

impl<'a, P: StoreView + 'a> TransactionIterator<'a, P> {
    pub(super) fn new(transaction: &'a DbTransaction<P>, parent: P::Iterator<'a>) -> Self {
        Self {
            transaction,
            write_key: None,
            parent,
            current: Current::None,
        }
    }

    fn first_write_from(&self, lower: Bound<&[u8]>) -> Option<&'a [u8]> {
        let transaction = self.transaction;
        transaction
            .writes
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(key, _)| key.as_slice())
    }

    /// Skips parent entries shadowed by a pending delete or write.
    fn skip_shadowed_parent_entries(&mut self) {
        while self.parent.valid() {
            let shadowed = self.parent.raw_key().is_some_and(|key| {
                self.transaction.deletes.contains(key) || self.transaction.writes.contains_key(key)
            });
            if !shadowed {
                break;
            }
            self.parent.next();
        }
    }

    fn update_current(&mut self) {
        let parent_key = if self.parent.valid() {
            self.parent.raw_key()
        } else {
            None
        };

        self.current = match (self.write_key, parent_key) {
            (Some(write_key), Some(parent_key)) => {
                if write_key < parent_key {
                    Current::Transaction
                } else {
                    Current::Parent
                }
            }
            (Some(_), None) => Current::Transaction,
            (None, Some(_)) => Current::Parent,
            (None, None) => Current::None,
        };
    }
}

impl<'a, P: StoreView + 'a> StoreIterator for TransactionIterator<'a, P> {
    fn valid(&self) -> bool {
        self.current != Current::None
    }

    fn seek_to_first(&mut self) {
        self.write_key = self.first_write_from(Bound::Unbounded);
        self.parent.seek_to_first();
        self.skip_shadowed_parent_entries();
        self.update_current();
    }

    fn seek_encoded(&mut self, key: &[u8]) {
        self.write_key = self.first_write_from(Bound::Included(key));
        self.parent.seek_encoded(key);
        self.skip_shadowed_parent_entries();
        self.update_current();
    }

    fn next(&mut self) {
        match self.current {
            Current::Transaction => {
                self.write_key = self
                    .write_key
                    .and_then(|key| self.first_write_from(Bound::Excluded(key)));
            }
            Current::Parent => {
                self.parent.next();
                self.skip_shadowed_parent_entries();
            }
            Current::None => return,
        }
        self.update_current();
    }

    fn raw_key(&self) -> Option<&[u8]> {
        match self.current {
            Current::Transaction => self.write_key,
            Current::Parent => self.parent.raw_key(),
            Current::None => None,
        }
    }

    fn value<V: DbValue>(&self) -> Result<V> {
        match self.current {
            Current::Transaction => {
                let key = self.write_key.ok_or(Error::InvalidIterator)?;
                self.transaction
                    .read_encoded(key)?
                    .ok_or(Error::InvalidIterator)
            }
            Current::Parent => self.parent.value(),
            Current::None => Err(Error::InvalidIterator),
        }
    }

    fn status(&self) -> Result<()> {
        self.parent.status()
    }
}
