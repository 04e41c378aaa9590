//! Test setup macros for reducing boilerplate when packing record buffers.

/// Build a fixed-length record buffer from a sequence of typed fields,
/// packed consecutively starting at offset 0.
///
/// # Syntax
///
/// ```text
/// record![len: 16, u32: 7, bytes: b"widgetz!"]
/// ```
///
/// Each field is packed in order; the buffer is zero-padded (or would
/// overflow, which panics) to `len` bytes.
///
/// # Examples
///
/// ```
/// use testsupport::record;
///
/// let r = record![len: 16, u32: 7, bytes: b"widgetz!"];
/// assert_eq!(r.len(), 16);
/// assert_eq!(&r[0..4], &7u32.to_le_bytes());
/// assert_eq!(&r[4..12], b"widgetz!");
/// ```
#[macro_export]
macro_rules! record {
    (len: $len:expr, $($kind:ident : $val:expr),+ $(,)?) => {{
        let mut buf = vec![0u8; $len];
        #[allow(unused_mut, unused_assignments)]
        let mut offset = 0usize;
        $(
            $crate::macros::pack_field(&mut buf, &mut offset, $crate::macros::Field::$kind($val));
        )+
        buf
    }};
}

/// Field kinds `record!` understands; not meant to be constructed
/// directly, only through the macro.
#[allow(non_camel_case_types)]
pub enum Field<'a> {
    u32(u32),
    u16(u16),
    bytes(&'a [u8]),
}

pub fn pack_field(buf: &mut [u8], offset: &mut usize, field: Field<'_>) {
    match field {
        Field::u32(v) => {
            buf[*offset..*offset + 4].copy_from_slice(&v.to_le_bytes());
            *offset += 4;
        }
        Field::u16(v) => {
            buf[*offset..*offset + 2].copy_from_slice(&v.to_le_bytes());
            *offset += 2;
        }
        Field::bytes(v) => {
            buf[*offset..*offset + v.len()].copy_from_slice(v);
            *offset += v.len();
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn record_macro_packs_fields_in_order() {
        let r = record![len: 16, u32: 7, u16: 9, bytes: b"tail"];
        assert_eq!(r.len(), 16);
        assert_eq!(u32::from_le_bytes(r[0..4].try_into().unwrap()), 7);
        assert_eq!(u16::from_le_bytes(r[4..6].try_into().unwrap()), 9);
        assert_eq!(&r[6..10], b"tail");
    }

    #[test]
    #[should_panic]
    fn record_macro_panics_on_overflow() {
        let _ = record![len: 2, u32: 1];
    }
}
