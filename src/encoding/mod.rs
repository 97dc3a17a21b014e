//! # Key/Value Encoding
//!
//! Serialization of keys and values into page payloads, and extraction of
//! the poor man's normalized key (PMNK) that lives inline in each slot.
//!
//! ## Design Goals
//!
//! 1. **PMNK order mirrors key order**: for any keys `a`, `b`,
//!    `pmnk(a) < pmnk(b)` implies `a < b`, so most comparisons resolve on
//!    the two slot bytes without touching the payload heap.
//! 2. **Zero payload bytes for small scalars**: a `u16` key is its own
//!    PMNK and occupies no payload at all; the payload holds only the
//!    value.
//! 3. **Zero-copy reads**: decoding reports where the value bytes start,
//!    so traversal can hand out offsets instead of copies.
//!
//! ## Record Layout
//!
//! ```text
//! Key type   Payload
//! --------   ----------------------------------------
//! u16        [value]                 (key lives in the PMNK)
//! u32/u64    [key, big-endian][value]
//! String     [key_len: u16][key bytes][value]
//! ```
//!
//! Values are fixed-width little-endian scalars, `PageId`s, or
//! `[len: u16][bytes]` strings. Wider scalar keys are stored big-endian so
//! the stored bytes sort the same way the PMNK does.
//!
//! ## Standalone Form
//!
//! Fence and foster keys live outside any slot, so they use a
//! self-delimiting encoding (`full_*` methods): fixed-width scalars as-is,
//! strings with their length prefix. For `u16` keys the standalone form is
//! the two big-endian bytes that the slot form elides.

use crate::config::{Pmnk, PMNK_SIZE};
use crate::node::mgr::PageId;

/// Keys the tree can index. Ordering of the Rust type must agree with the
/// ordering of the encoded bytes and of the PMNK.
pub trait KeyCodec: Ord + Clone + std::fmt::Debug + Send + Sync + 'static {
    /// The smallest value of the key domain; used as the sentinel
    /// separator for the leftmost child of a branch node.
    fn min_value() -> Self;

    /// First bytes of the key, big-endian, zero-extended.
    fn pmnk(&self) -> Pmnk;

    /// Bytes this key occupies in a record payload (0 when the PMNK alone
    /// reconstructs it).
    fn key_len(&self) -> usize;

    /// Length of the key portion of an already-encoded payload.
    fn key_len_in(payload: &[u8]) -> usize;

    fn encode_key(&self, buf: &mut [u8]);

    /// Inverse of `encode_key`; the slot's PMNK is supplied for key types
    /// that store nothing in the payload.
    fn decode_key(payload: &[u8], pmnk: Pmnk) -> Self;

    /// Size of the standalone (self-delimiting) form.
    fn full_len(&self) -> usize;

    /// Size of an encoded standalone form, read back from its bytes.
    fn full_len_in(payload: &[u8]) -> usize;

    fn encode_full(&self, buf: &mut [u8]);

    fn decode_full(payload: &[u8]) -> Self;
}

/// Values stored against keys. Branch nodes use `PageId` values.
pub trait ValueCodec: Clone + std::fmt::Debug + Send + Sync + 'static {
    fn value_len(&self) -> usize;

    /// Length of an encoded value, read back from its bytes.
    fn value_len_in(payload: &[u8]) -> usize;

    fn encode_value(&self, buf: &mut [u8]);

    fn decode_value(payload: &[u8]) -> Self;
}

/// Encoded size of a record about to be written.
pub fn payload_len_of<K: KeyCodec, V: ValueCodec>(key: &K, value: &V) -> usize {
    key.key_len() + value.value_len()
}

/// Encoded size of a record already in a payload.
pub fn payload_len_in<K: KeyCodec, V: ValueCodec>(payload: &[u8]) -> usize {
    let key_len = K::key_len_in(payload);
    key_len + V::value_len_in(&payload[key_len..])
}

/// Serializes a record into `buf`, which must hold `payload_len_of` bytes.
pub fn encode_pair<K: KeyCodec, V: ValueCodec>(buf: &mut [u8], key: &K, value: &V) {
    let key_len = key.key_len();
    key.encode_key(&mut buf[..key_len]);
    value.encode_value(&mut buf[key_len..key_len + value.value_len()]);
}

/// Deserializes a record, returning the pair and the offset of the value
/// bytes within the payload.
pub fn decode_pair<K: KeyCodec, V: ValueCodec>(payload: &[u8], pmnk: Pmnk) -> (K, V, usize) {
    let key = K::decode_key(payload, pmnk);
    let value_at = K::key_len_in(payload);
    let value = V::decode_value(&payload[value_at..]);
    (key, value, value_at)
}

// ---------------------------------------------------------------------
// Scalar keys
// ---------------------------------------------------------------------

impl KeyCodec for u16 {
    fn min_value() -> Self {
        0
    }

    fn pmnk(&self) -> Pmnk {
        *self
    }

    fn key_len(&self) -> usize {
        0
    }

    fn key_len_in(_payload: &[u8]) -> usize {
        0
    }

    fn encode_key(&self, _buf: &mut [u8]) {}

    fn decode_key(_payload: &[u8], pmnk: Pmnk) -> Self {
        pmnk
    }

    fn full_len(&self) -> usize {
        2
    }

    fn full_len_in(_payload: &[u8]) -> usize {
        2
    }

    fn encode_full(&self, buf: &mut [u8]) {
        buf[..2].copy_from_slice(&self.to_be_bytes());
    }

    fn decode_full(payload: &[u8]) -> Self {
        u16::from_be_bytes([payload[0], payload[1]])
    }
}

macro_rules! wide_scalar_key {
    ($ty:ty, $width:expr) => {
        impl KeyCodec for $ty {
            fn min_value() -> Self {
                0
            }

            fn pmnk(&self) -> Pmnk {
                (*self >> (($width - PMNK_SIZE) * 8)) as Pmnk
            }

            fn key_len(&self) -> usize {
                $width
            }

            fn key_len_in(_payload: &[u8]) -> usize {
                $width
            }

            fn encode_key(&self, buf: &mut [u8]) {
                buf[..$width].copy_from_slice(&self.to_be_bytes());
            }

            fn decode_key(payload: &[u8], _pmnk: Pmnk) -> Self {
                let mut bytes = [0u8; $width];
                bytes.copy_from_slice(&payload[..$width]);
                <$ty>::from_be_bytes(bytes)
            }

            fn full_len(&self) -> usize {
                $width
            }

            fn full_len_in(_payload: &[u8]) -> usize {
                $width
            }

            fn encode_full(&self, buf: &mut [u8]) {
                self.encode_key(buf);
            }

            fn decode_full(payload: &[u8]) -> Self {
                Self::decode_key(payload, 0)
            }
        }
    };
}

wide_scalar_key!(u32, 4);
wide_scalar_key!(u64, 8);

// ---------------------------------------------------------------------
// String keys
// ---------------------------------------------------------------------

const LEN_PREFIX: usize = 2;

fn read_len(payload: &[u8]) -> usize {
    u16::from_le_bytes([payload[0], payload[1]]) as usize
}

fn write_len(buf: &mut [u8], len: usize) {
    debug_assert!(len <= u16::MAX as usize);
    buf[..LEN_PREFIX].copy_from_slice(&(len as u16).to_le_bytes());
}

impl KeyCodec for String {
    /// The empty string. It is also a legal user key: a node whose low
    /// fence is the empty string lies on the leftmost root-to-leaf path,
    /// where the bound is effectively minus infinity anyway.
    fn min_value() -> Self {
        String::new()
    }

    fn pmnk(&self) -> Pmnk {
        let bytes = self.as_bytes();
        let mut prefix = [0u8; PMNK_SIZE];
        let n = bytes.len().min(PMNK_SIZE);
        prefix[..n].copy_from_slice(&bytes[..n]);
        Pmnk::from_be_bytes(prefix)
    }

    fn key_len(&self) -> usize {
        LEN_PREFIX + self.len()
    }

    fn key_len_in(payload: &[u8]) -> usize {
        LEN_PREFIX + read_len(payload)
    }

    fn encode_key(&self, buf: &mut [u8]) {
        write_len(buf, self.len());
        buf[LEN_PREFIX..LEN_PREFIX + self.len()].copy_from_slice(self.as_bytes());
    }

    fn decode_key(payload: &[u8], _pmnk: Pmnk) -> Self {
        let len = read_len(payload);
        // INVARIANT: encode_key wrote valid UTF-8
        String::from_utf8(payload[LEN_PREFIX..LEN_PREFIX + len].to_vec()).unwrap()
    }

    fn full_len(&self) -> usize {
        self.key_len()
    }

    fn full_len_in(payload: &[u8]) -> usize {
        Self::key_len_in(payload)
    }

    fn encode_full(&self, buf: &mut [u8]) {
        self.encode_key(buf);
    }

    fn decode_full(payload: &[u8]) -> Self {
        Self::decode_key(payload, 0)
    }
}

// ---------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------

macro_rules! scalar_value {
    ($ty:ty, $width:expr) => {
        impl ValueCodec for $ty {
            fn value_len(&self) -> usize {
                $width
            }

            fn value_len_in(_payload: &[u8]) -> usize {
                $width
            }

            fn encode_value(&self, buf: &mut [u8]) {
                buf[..$width].copy_from_slice(&self.to_le_bytes());
            }

            fn decode_value(payload: &[u8]) -> Self {
                let mut bytes = [0u8; $width];
                bytes.copy_from_slice(&payload[..$width]);
                <$ty>::from_le_bytes(bytes)
            }
        }
    };
}

scalar_value!(u32, 4);
scalar_value!(u64, 8);

impl ValueCodec for String {
    fn value_len(&self) -> usize {
        LEN_PREFIX + self.len()
    }

    fn value_len_in(payload: &[u8]) -> usize {
        LEN_PREFIX + read_len(payload)
    }

    fn encode_value(&self, buf: &mut [u8]) {
        write_len(buf, self.len());
        buf[LEN_PREFIX..LEN_PREFIX + self.len()].copy_from_slice(self.as_bytes());
    }

    fn decode_value(payload: &[u8]) -> Self {
        let len = read_len(payload);
        // INVARIANT: encode_value wrote valid UTF-8
        String::from_utf8(payload[LEN_PREFIX..LEN_PREFIX + len].to_vec()).unwrap()
    }
}

impl ValueCodec for PageId {
    fn value_len(&self) -> usize {
        4
    }

    fn value_len_in(_payload: &[u8]) -> usize {
        4
    }

    fn encode_value(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.get().to_le_bytes());
    }

    fn decode_value(payload: &[u8]) -> Self {
        PageId::new(u32::from_le_bytes([
            payload[0], payload[1], payload[2], payload[3],
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn u16_key_lives_entirely_in_the_pmnk() {
        let key = 0xABCDu16;
        assert_eq!(key.key_len(), 0);
        assert_eq!(key.pmnk(), 0xABCD);
        assert_eq!(u16::decode_key(&[], key.pmnk()), key);
    }

    #[test]
    fn wide_scalar_keys_round_trip_through_payload() {
        let key = 0xDEAD_BEEF_u32;
        let mut buf = [0u8; 4];
        key.encode_key(&mut buf);
        assert_eq!(u32::decode_key(&buf, key.pmnk()), key);
        assert_eq!(key.pmnk(), 0xDEAD);

        let key = 0x0102_0304_0506_0708_u64;
        let mut buf = [0u8; 8];
        key.encode_key(&mut buf);
        assert_eq!(u64::decode_key(&buf, key.pmnk()), key);
        assert_eq!(key.pmnk(), 0x0102);
    }

    #[test]
    fn string_key_pmnk_is_zero_padded() {
        assert_eq!("".to_string().pmnk(), 0);
        assert_eq!("a".to_string().pmnk(), u16::from_be_bytes([b'a', 0]));
        assert_eq!("abc".to_string().pmnk(), u16::from_be_bytes([b'a', b'b']));
    }

    #[test]
    fn empty_string_is_a_legal_key() {
        let key = String::new();
        let mut buf = vec![0u8; key.key_len()];
        key.encode_key(&mut buf);
        assert_eq!(String::decode_key(&buf, key.pmnk()), key);
        assert_eq!(String::key_len_in(&buf), 2);
    }

    #[test]
    fn pair_round_trip_and_value_offset() {
        let key = "hello".to_string();
        let value = 99u64;
        let len = payload_len_of(&key, &value);
        assert_eq!(len, 2 + 5 + 8);

        let mut buf = vec![0u8; len];
        encode_pair(&mut buf, &key, &value);
        let (k, v, value_at) = decode_pair::<String, u64>(&buf, key.pmnk());
        assert_eq!(k, key);
        assert_eq!(v, value);
        assert_eq!(value_at, 7);
        assert_eq!(payload_len_in::<String, u64>(&buf), len);
    }

    #[test]
    fn page_id_value_round_trips() {
        let id = PageId::new(77);
        let mut buf = [0u8; 4];
        id.encode_value(&mut buf);
        assert_eq!(PageId::decode_value(&buf), id);
    }

    #[test]
    fn standalone_forms_are_self_delimiting() {
        let key = "fence".to_string();
        let mut buf = vec![0u8; key.full_len()];
        key.encode_full(&mut buf);
        assert_eq!(String::full_len_in(&buf), buf.len());
        assert_eq!(String::decode_full(&buf), key);

        let key = 0x0807_0605_0403_0201_u64;
        let mut buf = vec![0u8; key.full_len()];
        key.encode_full(&mut buf);
        assert_eq!(u64::decode_full(&buf), key);
    }

    proptest! {
        #[test]
        fn pmnk_order_is_consistent_with_u64_order(a: u64, b: u64) {
            if a.pmnk() < b.pmnk() {
                prop_assert!(a < b);
            }
        }

        #[test]
        fn pmnk_order_is_consistent_with_string_order(a in ".{0,12}", b in ".{0,12}") {
            let (a, b) = (a.to_string(), b.to_string());
            if a.pmnk() < b.pmnk() {
                prop_assert!(a < b);
            }
        }

        #[test]
        fn string_pairs_round_trip(k in ".{0,24}", v in ".{0,24}") {
            let (k, v) = (k.to_string(), v.to_string());
            let mut buf = vec![0u8; payload_len_of(&k, &v)];
            encode_pair(&mut buf, &k, &v);
            let (k2, v2, _) = decode_pair::<String, String>(&buf, k.pmnk());
            prop_assert_eq!(k, k2);
            prop_assert_eq!(v, v2);
        }

        #[test]
        fn u64_pairs_round_trip(k: u64, v: u64) {
            let mut buf = vec![0u8; payload_len_of(&k, &v)];
            encode_pair(&mut buf, &k, &v);
            let (k2, v2, _) = decode_pair::<u64, u64>(&buf, k.pmnk());
            prop_assert_eq!(k, k2);
            prop_assert_eq!(v, v2);
        }
    }
}
