//! Common test fixtures: record builders and `CreateSpec` generators.
//!
//! Xtrieve records are fixed-length byte buffers, not typed SQL rows, so
//! these builders work at that level: pack a field into a buffer at a known
//! offset, or lay out a `CreateSpec` for a file with one or more keys.

use common::{KeyDescriptor, KeyFlags};
use protocol::CreateSpec;
use types::KeyType;

/// Build a record buffer of `record_length` bytes with a little-endian
/// `u32` at offset 0 and the remaining bytes filled from `tail`,
/// zero-padded or truncated to fit.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// let record = record_with_u32_key(16, 7, b"widgetz!!!!!");
/// assert_eq!(record.len(), 16);
/// assert_eq!(&record[0..4], &7u32.to_le_bytes());
/// ```
pub fn record_with_u32_key(record_length: u16, key: u32, tail: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; record_length as usize];
    buf[0..4].copy_from_slice(&key.to_le_bytes());
    let copy_len = tail.len().min(buf.len().saturating_sub(4));
    buf[4..4 + copy_len].copy_from_slice(&tail[..copy_len]);
    buf
}

/// A `CreateSpec` for a file with a single unique, unsigned 4-byte key at
/// offset 0.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// let spec = unique_unsigned_key_spec(16, 4);
/// assert_eq!(spec.key_descriptors.len(), 1);
/// ```
pub fn unique_unsigned_key_spec(record_length: u16, page_size: u16) -> CreateSpec {
    CreateSpec {
        record_length,
        page_size: page_size.max(512),
        key_descriptors: vec![KeyDescriptor {
            position: 0,
            length: 4,
            key_type: KeyType::Unsigned,
            flags: KeyFlags::empty(),
            null_value: 0,
        }],
    }
}

/// Like [`unique_unsigned_key_spec`], but the key permits duplicates.
pub fn duplicate_unsigned_key_spec(record_length: u16, page_size: u16) -> CreateSpec {
    CreateSpec {
        record_length,
        page_size: page_size.max(512),
        key_descriptors: vec![KeyDescriptor {
            position: 0,
            length: 4,
            key_type: KeyType::Unsigned,
            flags: KeyFlags::DUPLICATES,
            null_value: 0,
        }],
    }
}

/// A `CreateSpec` with two independent unsigned-4-byte keys, at offsets 0
/// and 4, useful for tests that need to switch `key_number`.
pub fn two_unsigned_keys_spec(record_length: u16, page_size: u16) -> CreateSpec {
    CreateSpec {
        record_length,
        page_size: page_size.max(512),
        key_descriptors: vec![
            KeyDescriptor {
                position: 0,
                length: 4,
                key_type: KeyType::Unsigned,
                flags: KeyFlags::empty(),
                null_value: 0,
            },
            KeyDescriptor {
                position: 4,
                length: 4,
                key_type: KeyType::Unsigned,
                flags: KeyFlags::DUPLICATES,
                null_value: 0,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_with_u32_key_places_key_at_offset_zero() {
        let record = record_with_u32_key(16, 42, b"payload");
        assert_eq!(record.len(), 16);
        assert_eq!(u32::from_le_bytes(record[0..4].try_into().unwrap()), 42);
        assert_eq!(&record[4..11], b"payload");
    }

    #[test]
    fn record_with_u32_key_truncates_an_oversized_tail() {
        let record = record_with_u32_key(8, 1, b"way too long for this buffer");
        assert_eq!(record.len(), 8);
    }

    #[test]
    fn two_unsigned_keys_spec_has_independent_descriptors() {
        let spec = two_unsigned_keys_spec(16, 4096);
        assert_eq!(spec.key_descriptors[0].position, 0);
        assert_eq!(spec.key_descriptors[1].position, 4);
        assert!(spec.key_descriptors[1].flags.contains(KeyFlags::DUPLICATES));
    }
}
