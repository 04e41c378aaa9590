//! Key types and comparators for Btrieve-style indexed keys.
//!
//! A Btrieve key is not a typed SQL value — it is a byte range lifted out of
//! a fixed-length record and interpreted according to a declared [`KeyType`].
//! This crate owns that interpretation: how two extracted key segments
//! compare, and how a composite (segmented) key compares segment by segment.

use std::cmp::Ordering;


/// The type tag carried by a key descriptor, selecting how its raw bytes
/// are compared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum KeyType {
    /// Signed, little-endian integer of the descriptor's declared length
    /// (1, 2, 4, or 8 bytes).
    Integer,
    /// Unsigned, little-endian integer of the descriptor's declared length.
    Unsigned,
    /// Packed-BCD decimal with a sign nibble in the last byte.
    Decimal,
    /// Packed-BCD monetary value; compares identically to `Decimal`.
    Money,
    /// IEEE-754 binary float, 4 or 8 bytes depending on declared length.
    Float,
    /// Btrieve "bfloat" (Microsoft Basic float); normalized to `f64` before
    /// comparison.
    BFloat,
    /// Fixed-width byte string, compared byte-lexicographically.
    String,
    /// Null-terminated string; comparison stops at the first `0x00` in
    /// either operand.
    ZString,
}

/// One segment of an extracted key: the raw bytes lifted from a record plus
/// enough metadata to compare it against another segment of the same type.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KeySegment {
    pub bytes: Vec<u8>,
    pub key_type: KeyType,
    pub descending: bool,
}

impl KeySegment {
    pub fn new(bytes: Vec<u8>, key_type: KeyType, descending: bool) -> Self {
        Self {
            bytes,
            key_type,
            descending,
        }
    }
}

/// A composite (possibly segmented) key: one or more [`KeySegment`]s compared
/// left to right, the first non-equal segment deciding the outcome.
pub type CompositeKey = Vec<KeySegment>;

/// Compare two key segments of the same declared type, honoring the
/// descending flag.
pub fn compare_segment(a: &KeySegment, b: &KeySegment) -> Ordering {
    let ord = match a.key_type {
        KeyType::Integer => compare_signed(&a.bytes, &b.bytes),
        KeyType::Unsigned => compare_unsigned(&a.bytes, &b.bytes),
        KeyType::Decimal | KeyType::Money => compare_decimal(&a.bytes, &b.bytes),
        KeyType::Float | KeyType::BFloat => compare_float(&a.bytes, &b.bytes),
        KeyType::String => a.bytes.cmp(&b.bytes),
        KeyType::ZString => compare_zstring(&a.bytes, &b.bytes),
    };
    if a.descending { ord.reverse() } else { ord }
}

/// Compare two composite keys segment by segment; the first non-equal
/// segment decides the result. Keys of mismatched segment counts compare
/// on their shared prefix and then by length (used by `GetEqual` with a
/// partial key).
pub fn compare_composite(a: &[KeySegment], b: &[KeySegment]) -> Ordering {
    for (sa, sb) in a.iter().zip(b.iter()) {
        let ord = compare_segment(sa, sb);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Compares a stored segment against a probe that may be shorter than the
/// descriptor's declared key length: when `probe` is shorter, only
/// `stored`'s matching-length prefix is compared, so a probe of `n` bytes
/// matches any stored key whose first `n` bytes compare equal under the
/// descriptor's type and direction. Used by `GetEqual` with a partial key
/// buffer.
pub fn compare_segment_prefix(stored: &KeySegment, probe: &KeySegment) -> Ordering {
    if probe.bytes.len() >= stored.bytes.len() {
        return compare_segment(stored, probe);
    }
    let truncated = KeySegment::new(
        stored.bytes[..probe.bytes.len()].to_vec(),
        stored.key_type,
        stored.descending,
    );
    compare_segment(&truncated, probe)
}

/// Composite-key counterpart to [`compare_segment_prefix`].
pub fn compare_composite_prefix(stored: &[KeySegment], probe: &[KeySegment]) -> Ordering {
    for (s, p) in stored.iter().zip(probe.iter()) {
        let ord = compare_segment_prefix(s, p);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    stored.len().cmp(&probe.len())
}

fn sign_extend(bytes: &[u8]) -> i128 {
    if bytes.is_empty() {
        return 0;
    }
    let negative = bytes[bytes.len() - 1] & 0x80 != 0;
    let mut acc: i128 = if negative { -1 } else { 0 };
    for (i, &byte) in bytes.iter().enumerate() {
        acc &= !(0xffi128 << (i * 8));
        acc |= (byte as i128) << (i * 8);
    }
    acc
}

fn compare_signed(a: &[u8], b: &[u8]) -> Ordering {
    sign_extend(a).cmp(&sign_extend(b))
}

fn zero_extend(bytes: &[u8]) -> u128 {
    let mut acc: u128 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        acc |= (byte as u128) << (i * 8);
    }
    acc
}

fn compare_unsigned(a: &[u8], b: &[u8]) -> Ordering {
    zero_extend(a).cmp(&zero_extend(b))
}

/// Decode a packed-BCD value: each byte holds two decimal digits (high
/// nibble first), with the final byte's low nibble carrying the sign
/// (`0xC`/`0xA`/`0xE` positive, `0xB`/`0xD` negative).
fn decode_bcd(bytes: &[u8]) -> i128 {
    if bytes.is_empty() {
        return 0;
    }
    let mut digits = Vec::with_capacity(bytes.len() * 2);
    for (idx, &byte) in bytes.iter().enumerate() {
        let hi = byte >> 4;
        let lo = byte & 0x0f;
        digits.push(hi);
        if idx != bytes.len() - 1 {
            digits.push(lo);
        }
    }
    let sign_nibble = bytes[bytes.len() - 1] & 0x0f;
    let negative = matches!(sign_nibble, 0xb | 0xd);
    let mut value: i128 = 0;
    for digit in digits {
        if digit <= 9 {
            value = value * 10 + digit as i128;
        }
    }
    if negative { -value } else { value }
}

fn compare_decimal(a: &[u8], b: &[u8]) -> Ordering {
    decode_bcd(a).cmp(&decode_bcd(b))
}

/// Compare IEEE floats with the Btrieve convention that NaN sorts after
/// every number (including +infinity).
fn compare_float(a: &[u8], b: &[u8]) -> Ordering {
    let fa = decode_float(a);
    let fb = decode_float(b);
    match (fa.is_nan(), fb.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => fa.partial_cmp(&fb).unwrap_or(Ordering::Equal),
    }
}

fn decode_float(bytes: &[u8]) -> f64 {
    match bytes.len() {
        4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(bytes);
            f32::from_le_bytes(buf) as f64
        }
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            f64::from_le_bytes(buf)
        }
        _ => 0.0,
    }
}

fn compare_zstring(a: &[u8], b: &[u8]) -> Ordering {
    let ta = a.split(|&b| b == 0).next().unwrap_or(&[]);
    let tb = b.split(|&b| b == 0).next().unwrap_or(&[]);
    ta.cmp(tb)
}

/// Returns true if every byte of `bytes` equals `null_value` — the
/// condition under which a nullable key is left unindexed.
pub fn is_null_key(bytes: &[u8], null_value: u8) -> bool {
    bytes.iter().all(|&b| b == null_value)
}
