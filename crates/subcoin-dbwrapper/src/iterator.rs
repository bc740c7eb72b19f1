use crate::codec::{DbValue, decode_value};
use crate::database::xor_in_place;
use crate::view::StoreIterator;
use crate::{Error, Result};
use rocksdb::DBRawIterator;

/// Iterator over the entries of a [`crate::Database`].
///
/// The entries are read from the implicit snapshot taken when the iterator was created.
pub struct DbIterator<'a> {
    iter: DBRawIterator<'a>,
    obfuscate_key: &'a [u8],
}

impl<'a> DbIterator<'a> {
    pub(crate) fn new(iter: DBRawIterator<'a>, obfuscate_key: &'a [u8]) -> Self {
        Self {
            iter,
            obfuscate_key,
        }
    }

    /// De-obfuscated bytes of the current value.
    pub fn raw_value(&self) -> Option<Vec<u8>> {
        self.iter.value().map(|value| {
            let mut value = value.to_vec();
            xor_in_place(&mut value, self.obfuscate_key);
            value
        })
    }

    fn warn_on_error(&self) {
        if !self.iter.valid() {
            if let Err(err) = self.iter.status() {
                tracing::warn!("Database iterator stopped on read error: {err}");
            }
        }
    }
}

impl StoreIterator for DbIterator<'_> {
    fn valid(&self) -> bool {
        self.iter.valid()
    }

    fn seek_to_first(&mut self) {
        self.iter.seek_to_first();
        self.warn_on_error();
    }

    fn seek_encoded(&mut self, key: &[u8]) {
        self.iter.seek(key);
        self.warn_on_error();
    }

    fn next(&mut self) {
        if self.iter.valid() {
            self.iter.next();
            self.warn_on_error();
        }
    }

    fn raw_key(&self) -> Option<&[u8]> {
        self.iter.key()
    }

    fn value<V: DbValue>(&self) -> Result<V> {
        let value = self.raw_value().ok_or(Error::InvalidIterator)?;
        decode_value(&value)
    }

    fn status(&self) -> Result<()> {
        self.iter.status().map_err(Error::Rocksdb)
    }
}
