//! Order-preserving key encoding and value serialization.
//!
//! Keys are compared as raw bytes by the engine, so every [`KeyEncode`] impl must produce
//! encodings whose lexicographic order matches the order callers iterate in:
//!
//! - Unsigned integers are big-endian.
//! - Hashes and fixed-size arrays are written raw.
//! - Variable-length byte strings carry a compact-size length prefix (the same framing used
//!   by Bitcoin Core), which orders them by length first and content second.
//! - Tuples concatenate their components, so a tuple whose leading components are fixed-size
//!   can be range scanned by seeking to the prefix.
//!
//! Values are serialized with bincode.

use crate::{Error, Result};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint, Txid, Wtxid};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Initial capacity reserved for an encoded key.
pub const PREALLOC_KEY_SIZE: usize = 64;

/// Type that can be encoded into an ordered database key.
pub trait KeyEncode {
    /// Appends the encoding of `self` to `out`.
    fn encode_key(&self, out: &mut Vec<u8>);

    /// Returns the encoded key.
    fn key_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PREALLOC_KEY_SIZE);
        self.encode_key(&mut out);
        out
    }
}

/// Type that can be decoded from an ordered database key.
pub trait KeyDecode: Sized {
    /// Decodes a value from the front of `input`, advancing it past the consumed bytes.
    fn decode_key(input: &mut &[u8]) -> Result<Self>;

    /// Decodes a key from its full encoding.
    ///
    /// Trailing bytes are ignored, a key type may describe just a prefix of the stored key.
    fn from_key_bytes(mut bytes: &[u8]) -> Result<Self> {
        Self::decode_key(&mut bytes)
    }
}

/// Type that can be stored as a database value.
///
/// `Clone` is required because pending overlay writes are handed out by copy.
pub trait DbValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> DbValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Serializes a value for storage.
pub fn encode_value<V: Serialize + ?Sized>(value: &V) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|err| Error::Serialization(err.to_string()))
}

/// Deserializes a stored value.
pub fn decode_value<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    bincode::deserialize(bytes).map_err(|err| Error::Deserialization(err.to_string()))
}

/// Size of the serialized value in bytes, used for memory accounting.
pub fn value_size<V: Serialize + ?Sized>(value: &V) -> usize {
    bincode::serialized_size(value).map_or(0, |size| size as usize)
}

// https://github.com/bitcoin/bitcoin/blob/0903ce8dbc25d3823b03d52f6e6bff74d19e801e/src/serialize.h#L305
fn write_compact_size(out: &mut Vec<u8>, size: u64) {
    if size < 253 {
        out.push(size as u8);
    } else if size <= 0xFFFF {
        out.push(253);
        out.extend_from_slice(&(size as u16).to_le_bytes());
    } else if size <= 0xFFFF_FFFF {
        out.push(254);
        out.extend_from_slice(&(size as u32).to_le_bytes());
    } else {
        out.push(255);
        out.extend_from_slice(&size.to_le_bytes());
    }
}

fn read_compact_size(input: &mut &[u8]) -> Result<u64> {
    let [first] = take::<1>(input)?;
    let size = match first {
        253 => u16::from_le_bytes(take(input)?) as u64,
        254 => u32::from_le_bytes(take(input)?) as u64,
        255 => u64::from_le_bytes(take(input)?),
        n => n as u64,
    };
    Ok(size)
}

fn take<const N: usize>(input: &mut &[u8]) -> Result<[u8; N]> {
    if input.len() < N {
        return Err(Error::Deserialization(format!(
            "key too short: need {N} bytes, {} left",
            input.len()
        )));
    }
    let (head, rest) = input.split_at(N);
    *input = rest;
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok(out)
}

fn take_slice<'a>(input: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if input.len() < len {
        return Err(Error::Deserialization(format!(
            "key too short: need {len} bytes, {} left",
            input.len()
        )));
    }
    let (head, rest) = input.split_at(len);
    *input = rest;
    Ok(head)
}

impl<T: KeyEncode + ?Sized> KeyEncode for &T {
    fn encode_key(&self, out: &mut Vec<u8>) {
        (**self).encode_key(out)
    }
}

macro_rules! impl_key_for_uint {
    ($($ty:ty),*) => {
        $(
            impl KeyEncode for $ty {
                fn encode_key(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_be_bytes());
                }
            }

            impl KeyDecode for $ty {
                fn decode_key(input: &mut &[u8]) -> Result<Self> {
                    Ok(<$ty>::from_be_bytes(take(input)?))
                }
            }
        )*
    };
}

impl_key_for_uint!(u8, u16, u32, u64);

impl<const N: usize> KeyEncode for [u8; N] {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl<const N: usize> KeyDecode for [u8; N] {
    fn decode_key(input: &mut &[u8]) -> Result<Self> {
        take(input)
    }
}

impl KeyEncode for [u8] {
    fn encode_key(&self, out: &mut Vec<u8>) {
        write_compact_size(out, self.len() as u64);
        out.extend_from_slice(self);
    }
}

impl KeyEncode for Vec<u8> {
    fn encode_key(&self, out: &mut Vec<u8>) {
        self.as_slice().encode_key(out)
    }
}

impl KeyDecode for Vec<u8> {
    fn decode_key(input: &mut &[u8]) -> Result<Self> {
        let len = read_compact_size(input)?;
        Ok(take_slice(input, len as usize)?.to_vec())
    }
}

impl KeyEncode for str {
    fn encode_key(&self, out: &mut Vec<u8>) {
        self.as_bytes().encode_key(out)
    }
}

impl KeyEncode for String {
    fn encode_key(&self, out: &mut Vec<u8>) {
        self.as_str().encode_key(out)
    }
}

impl KeyDecode for String {
    fn decode_key(input: &mut &[u8]) -> Result<Self> {
        let bytes = Vec::<u8>::decode_key(input)?;
        String::from_utf8(bytes).map_err(|err| Error::Deserialization(err.to_string()))
    }
}

macro_rules! impl_key_for_hash {
    ($($ty:ty),*) => {
        $(
            impl KeyEncode for $ty {
                fn encode_key(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(self.as_byte_array());
                }
            }

            impl KeyDecode for $ty {
                fn decode_key(input: &mut &[u8]) -> Result<Self> {
                    Ok(<$ty>::from_byte_array(take(input)?))
                }
            }
        )*
    };
}

impl_key_for_hash!(Txid, Wtxid, BlockHash);

/// Format: txid (32 bytes, raw) || vout (4 bytes, big-endian)
impl KeyEncode for OutPoint {
    fn encode_key(&self, out: &mut Vec<u8>) {
        self.txid.encode_key(out);
        self.vout.encode_key(out);
    }
}

impl KeyDecode for OutPoint {
    fn decode_key(input: &mut &[u8]) -> Result<Self> {
        let txid = Txid::decode_key(input)?;
        let vout = u32::decode_key(input)?;
        Ok(OutPoint { txid, vout })
    }
}

impl<A: KeyEncode, B: KeyEncode> KeyEncode for (A, B) {
    fn encode_key(&self, out: &mut Vec<u8>) {
        self.0.encode_key(out);
        self.1.encode_key(out);
    }
}

impl<A: KeyDecode, B: KeyDecode> KeyDecode for (A, B) {
    fn decode_key(input: &mut &[u8]) -> Result<Self> {
        Ok((A::decode_key(input)?, B::decode_key(input)?))
    }
}

impl<A: KeyEncode, B: KeyEncode, C: KeyEncode> KeyEncode for (A, B, C) {
    fn encode_key(&self, out: &mut Vec<u8>) {
        self.0.encode_key(out);
        self.1.encode_key(out);
        self.2.encode_key(out);
    }
}

impl<A: KeyDecode, B: KeyDecode, C: KeyDecode> KeyDecode for (A, B, C) {
    fn decode_key(input: &mut &[u8]) -> Result<Self> {
        Ok((
            A::decode_key(input)?,
            B::decode_key(input)?,
            C::decode_key(input)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_keys_sort_numerically() {
        let mut values = vec![0u32, 1, 255, 256, 65_535, 65_536, u32::MAX];
        let mut encoded: Vec<Vec<u8>> = values.iter().map(KeyEncode::key_bytes).collect();
        encoded.sort();
        values.sort();
        let decoded: Vec<u32> = encoded
            .iter()
            .map(|bytes| u32::from_key_bytes(bytes).unwrap())
            .collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_tuple_prefix_groups_keys() {
        let a = (b'c', 7u64).key_bytes();
        let b = (b'c', 300u64).key_bytes();
        let other = (b'd', 0u64).key_bytes();
        assert!(a < b);
        assert!(b < other);
        assert_eq!(a[0], b'c');
        assert_eq!(<(u8, u64)>::from_key_bytes(&b).unwrap(), (b'c', 300));
    }

    #[test]
    fn test_outpoint_key_layout() {
        let outpoint = OutPoint {
            txid: Txid::from_byte_array([7u8; 32]),
            vout: 42,
        };

        let key = outpoint.key_bytes();
        assert_eq!(key.len(), 36);
        assert_eq!(&key[32..], &42u32.to_be_bytes());
        assert_eq!(OutPoint::from_key_bytes(&key).unwrap(), outpoint);
    }

    #[test]
    fn test_string_key_uses_compact_size_prefix() {
        let key = "obfuscate".key_bytes();
        assert_eq!(key[0], 9);
        assert_eq!(&key[1..], b"obfuscate");
        assert_eq!(String::from_key_bytes(&key).unwrap(), "obfuscate");
    }

    #[test]
    fn test_truncated_key_is_rejected() {
        let err = u64::from_key_bytes(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));

        let err = Vec::<u8>::from_key_bytes(&[5, 1, 2]).unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }

    #[test]
    fn test_compact_size_boundaries() {
        let cases = [
            (0u64, 1),
            (252, 1),
            (253, 3),
            (0xFFFF, 3),
            (0x1_0000, 5),
            (0xFFFF_FFFF, 5),
            (0x1_0000_0000, 9),
        ];
        for (size, len) in cases {
            let mut out = Vec::new();
            write_compact_size(&mut out, size);
            assert_eq!(out.len(), len);
            let mut input = out.as_slice();
            assert_eq!(read_compact_size(&mut input).unwrap(), size);
            assert!(input.is_empty());
        }
    }
}
