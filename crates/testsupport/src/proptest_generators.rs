//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random record buffers and composite
//! keys for property-based testing of the storage and indexing layers.

use proptest::prelude::*;
use types::{CompositeKey, KeySegment, KeyType};

/// Strategy for generating a random fixed-length record buffer.
///
/// # Example
///
/// ```
/// use proptest::prelude::*;
/// use testsupport::proptest_generators::arb_record;
///
/// proptest! {
///     #[test]
///     fn test_record_length(record in arb_record(16)) {
///         assert_eq!(record.len(), 16);
///     }
/// }
/// ```
pub fn arb_record(len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), len)
}

/// Strategy for generating a random unsigned 4-byte key segment.
pub fn arb_unsigned_segment() -> impl Strategy<Value = KeySegment> {
    any::<u32>().prop_map(|v| KeySegment::new(v.to_le_bytes().to_vec(), KeyType::Unsigned, false))
}

/// Strategy for generating a random single-segment composite key built from
/// an unsigned 4-byte value.
///
/// # Example
///
/// ```
/// use proptest::prelude::*;
/// use testsupport::proptest_generators::arb_unsigned_key;
///
/// proptest! {
///     #[test]
///     fn test_key_has_one_segment(key in arb_unsigned_key()) {
///         assert_eq!(key.len(), 1);
///     }
/// }
/// ```
pub fn arb_unsigned_key() -> impl Strategy<Value = CompositeKey> {
    arb_unsigned_segment().prop_map(|segment| vec![segment])
}

/// Strategy for a fixed-length ASCII-lowercase byte string segment, useful
/// for `KeyType::String`/`ZString` key tests.
pub fn arb_string_segment(len: usize) -> impl Strategy<Value = KeySegment> {
    proptest::string::string_regex(&format!("[a-z]{{{len}}}"))
        .unwrap()
        .prop_map(move |s| KeySegment::new(s.into_bytes(), KeyType::String, false))
}
