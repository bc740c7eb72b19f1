use crate::codec::{KeyEncode, encode_value};
use crate::database::xor_in_place;
use crate::transaction::Changes;
use crate::view::CommitTarget;
use crate::Result;
use rocksdb::WriteBatch;
use serde::Serialize;

/// Batch of changes queued to be written to a [`crate::Database`] atomically.
///
/// Values are obfuscated with the key of the database the batch was created from.
pub struct Batch {
    inner: WriteBatch,
    obfuscate_key: Vec<u8>,
    size_estimate: usize,
}

impl Batch {
    pub(crate) fn new(obfuscate_key: Vec<u8>) -> Self {
        Self {
            inner: WriteBatch::default(),
            obfuscate_key,
            size_estimate: 0,
        }
    }

    /// Queue a write of `value` under `key`.
    pub fn write<K, V>(&mut self, key: &K, value: &V) -> Result<()>
    where
        K: KeyEncode + ?Sized,
        V: Serialize + ?Sized,
    {
        self.write_encoded(&key.key_bytes(), encode_value(value)?);
        Ok(())
    }

    /// Queue a write of an already serialized value under an already encoded key.
    pub fn write_encoded(&mut self, key: &[u8], mut value: Vec<u8>) {
        xor_in_place(&mut value, &self.obfuscate_key);

        // The engine serializes a put as a tag byte followed by the varint-prefixed key
        // and the varint-prefixed value.
        self.size_estimate +=
            1 + varint_len(key.len()) + key.len() + varint_len(value.len()) + value.len();

        self.inner.put(key, value);
    }

    /// Queue the removal of `key`.
    pub fn erase<K: KeyEncode + ?Sized>(&mut self, key: &K) {
        self.erase_encoded(&key.key_bytes());
    }

    /// Queue the removal of an already encoded key.
    pub fn erase_encoded(&mut self, key: &[u8]) {
        self.size_estimate += 1 + varint_len(key.len()) + key.len();
        self.inner.delete(key);
    }

    /// Drop all queued operations.
    pub fn clear(&mut self) {
        self.inner.clear();
        self.size_estimate = 0;
    }

    /// Approximate serialized size of the queued operations.
    pub fn size_estimate(&self) -> usize {
        self.size_estimate
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn into_inner(self) -> WriteBatch {
        self.inner
    }
}

impl CommitTarget for Batch {
    fn commit_changes(&mut self, changes: Changes) -> Result<()> {
        let (deletes, writes) = changes.into_parts();
        for key in &deletes {
            self.erase_encoded(key);
        }
        for (key, value) in &writes {
            self.write_encoded(key, value.encode()?);
        }
        Ok(())
    }
}

fn varint_len(n: usize) -> usize {
    let bits = usize::BITS - n.leading_zeros();
    (bits as usize).div_ceil(7).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_len() {
        assert_eq!(varint_len(0), 1);
        assert_eq!(varint_len(127), 1);
        assert_eq!(varint_len(128), 2);
        assert_eq!(varint_len(16_383), 2);
        assert_eq!(varint_len(16_384), 3);
    }

    #[test]
    fn test_size_estimate_tracks_operations() {
        let mut batch = Batch::new(vec![0u8; 8]);
        assert!(batch.is_empty());

        batch.write_encoded(b"key", vec![1, 2, 3, 4]);
        assert_eq!(batch.size_estimate(), 1 + 1 + 3 + 1 + 4);

        batch.erase_encoded(&[0u8; 200]);
        assert_eq!(batch.size_estimate(), 10 + 1 + 2 + 200);
        assert_eq!(batch.len(), 2);

        batch.clear();
        assert_eq!(batch.size_estimate(), 0);
        assert!(batch.is_empty());
    }
}
