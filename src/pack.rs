use crate::errors;
use crate::fields;

use byteorder::{BigEndian, ByteOrder};

/// Wire encoding shared by every field and message.
///
/// `unpack` consumes a value from the front of `v` and returns the bytes that follow it.
/// Decoding never reads past the end of `v`: short input is a `TruncatedError`.
pub trait Pack {
    fn empty() -> Self;
    fn len(&self) -> usize {
        self.pack().len()
    }
    fn pack(&self) -> Vec<u8>;
    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError>;
}

/// Leaves the first `n` bytes in `v` and returns everything after them.
pub fn take_front(v: &mut Vec<u8>, n: usize) -> Result<Vec<u8>, errors::TLSError> {
    if v.len() < n {
        return Err(errors::TLSError::TruncatedError {
            needed: n,
            available: v.len(),
        });
    }
    Ok(v.split_off(n))
}

/// Reads a `width`-byte big-endian length prefix. Returns the length and the bytes after the prefix.
pub fn read_length(v: &mut Vec<u8>, width: usize) -> Result<(usize, Vec<u8>), errors::TLSError> {
    let rest = take_front(v, width)?;
    let length = BigEndian::read_uint(&v[..width], width);
    Ok((length as usize, rest))
}

pub fn write_length(v: &mut Vec<u8>, width: usize, length: usize) {
    let mut bytes = [0; 8];
    BigEndian::write_uint(&mut bytes[..width], length as u64, width);
    v.extend_from_slice(&bytes[..width]);
}

/// Splits a length-prefixed payload off the front of `v`, enforcing `max`.
/// Returns `(payload, rest)`.
pub fn read_prefixed(v: &mut Vec<u8>, width: usize, max: usize) -> Result<(Vec<u8>, Vec<u8>), errors::TLSError> {
    let (length, mut field) = read_length(v, width)?;
    if length > max {
        return Err(errors::TLSError::LengthOverflowError { declared: length, max });
    }
    let rest = take_front(&mut field, length)?;
    Ok((field, rest))
}

impl<E> Pack for fields::NetVec<E>
where
    E: Pack + Clone,
{
    fn empty() -> Self {
        fields::NetVec::new()
    }

    fn pack(&self) -> Vec<u8> {
        let mut v = Vec::new();
        for e in self {
            v.extend_from_slice(&*e.pack());
        }
        v
    }

    // Unprefixed sequences run to the end of their enclosing field.
    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        self.clear();
        let mut field = std::mem::take(v);
        while !field.is_empty() {
            let mut e = E::empty();
            field = e.unpack(&mut field)?;
            self.push(e);
        }
        Ok(Vec::new())
    }
}

impl Pack for fields::Uint8 {
    fn empty() -> Self {
        fields::Uint8(0)
    }

    fn pack(&self) -> Vec<u8> {
        vec![self.0]
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let rest = take_front(v, 1)?;
        self.0 = v[0];
        Ok(rest)
    }
}

impl Pack for fields::Uint16 {
    fn empty() -> Self {
        fields::Uint16(0)
    }

    fn pack(&self) -> Vec<u8> {
        let mut bytes: [u8; 2] = [0; 2];
        BigEndian::write_u16(&mut bytes, self.0);
        bytes.to_vec()
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let rest = take_front(v, 2)?;
        self.0 = BigEndian::read_u16(&v[..2]);
        Ok(rest)
    }
}

impl Pack for fields::Uint24 {
    fn empty() -> Self {
        fields::Uint24([0; 3])
    }

    fn pack(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let rest = take_front(v, 3)?;
        self.0 = [v[0], v[1], v[2]];
        Ok(rest)
    }
}

impl Pack for fields::Uint32 {
    fn empty() -> Self {
        fields::Uint32(0)
    }

    fn pack(&self) -> Vec<u8> {
        let mut bytes: [u8; 4] = [0; 4];
        BigEndian::write_u32(&mut bytes, self.0);
        bytes.to_vec()
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let rest = take_front(v, 4)?;
        self.0 = BigEndian::read_u32(&v[..4]);
        Ok(rest)
    }
}

impl<const N: usize> Pack for fields::FixedOpaque<N> {
    fn empty() -> Self {
        fields::FixedOpaque([0; N])
    }

    fn pack(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let rest = take_front(v, N)?;
        self.0.copy_from_slice(&v[..N]);
        Ok(rest)
    }
}

impl<const L: usize, const MAX: usize> Pack for fields::VarOpaque<L, MAX> {
    fn empty() -> Self {
        Self::default()
    }

    fn pack(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(L + self.payload_len());
        write_length(&mut v, L, self.payload_len());
        v.extend_from_slice(self.as_slice());
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let (field, rest) = read_prefixed(v, L, MAX)?;
        self.set_unchecked(field);
        Ok(rest)
    }
}

impl<T, const L: usize, const MAX: usize> Pack for fields::VarList<T, L, MAX>
where
    T: Pack,
{
    fn empty() -> Self {
        Self::default()
    }

    fn pack(&self) -> Vec<u8> {
        let body: Vec<u8> = self.items().iter().flat_map(|i| i.pack()).collect();
        let mut v = Vec::with_capacity(L + body.len());
        write_length(&mut v, L, body.len());
        v.extend_from_slice(&body);
        v
    }

    fn unpack(&mut self, v: &mut Vec<u8>) -> Result<Vec<u8>, errors::TLSError> {
        let (mut field, rest) = read_prefixed(v, L, MAX)?;
        let mut items = Vec::new();
        while !field.is_empty() {
            let mut item = T::empty();
            field = item.unpack(&mut field).map_err(|e| match e {
                errors::TLSError::TruncatedError { .. } => errors::TLSError::DecodeError("list element overruns its list"),
                e => e,
            })?;
            items.push(item);
        }
        self.set_items_unchecked(items);
        Ok(rest)
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::TLSError;
    use crate::fields;
    use crate::pack::Pack;
    use crate::pack_unpack_inverse_test;

    pack_unpack_inverse_test!(uint8_pack_unpack_inverse_test, fields::Uint8(14));

    pack_unpack_inverse_test!(uint24_pack_unpack_inverse_test, fields::Uint24([250, 100, 4]));

    pack_unpack_inverse_test!(
        var_list_pack_unpack_inverse_test,
        fields::VarList::<fields::Uint16, 2, 0xfffe>::new(vec![fields::Uint16(0x002f), fields::Uint16(0x0035)])
            .expect("building VarList failed")
    );

    #[test]
    fn integral_fields_are_big_endian() {
        assert_eq!(fields::Uint16(0x0102).pack(), vec![1, 2]);
        assert_eq!(fields::Uint32(0x0102_0304).pack(), vec![1, 2, 3, 4]);
        assert_eq!(fields::uint24_from_u32(0x010203).expect("u24 failed").pack(), vec![1, 2, 3]);
        assert!(fields::uint24_from_u32(0x0100_0000).is_err());
    }

    #[test]
    fn unpack_returns_the_remaining_bytes() {
        let mut v = vec![0xab, 0xcd, 0xef];
        let mut field = fields::Uint16::empty();
        let rest = field.unpack(&mut v).expect("unpack failed");
        assert_eq!(field, fields::Uint16(0xabcd));
        assert_eq!(rest, vec![0xef]);
    }

    #[test]
    fn short_integral_field_is_truncated() {
        let mut v = vec![0x01, 0x02, 0x03];
        let err = fields::Uint32::empty().unpack(&mut v).expect_err("short u32 decoded");
        assert!(matches!(err, TLSError::TruncatedError { needed: 4, available: 3 }));
    }

    #[test]
    fn declared_length_equal_to_max_decodes() {
        let mut v = vec![4, 1, 2, 3, 4, 9];
        let mut field = fields::VarOpaque::<1, 4>::empty();
        let rest = field.unpack(&mut v).expect("length == MAX should decode");
        assert_eq!(field.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(rest, vec![9]);
    }

    #[test]
    fn declared_length_above_max_overflows() {
        let mut v = vec![5, 1, 2, 3, 4, 5];
        let err = fields::VarOpaque::<1, 4>::empty().unpack(&mut v).expect_err("MAX + 1 decoded");
        assert!(matches!(err, TLSError::LengthOverflowError { declared: 5, max: 4 }));
    }

    #[test]
    fn declared_length_beyond_input_is_truncated() {
        let mut v = vec![0x00, 0x10, 1, 2, 3];
        let err = fields::VarOpaque::<2, 0xffff>::empty().unpack(&mut v).expect_err("overlong prefix decoded");
        assert!(matches!(err, TLSError::TruncatedError { needed: 16, available: 3 }));
    }

    #[test]
    fn three_byte_prefix() {
        let field = fields::VarOpaque::<3, 0xff_ffff>::new(vec![7; 300]).expect("building VarOpaque failed");
        let packed = field.pack();
        assert_eq!(&packed[..3], &[0x00, 0x01, 0x2c]);
        let mut decoded = fields::VarOpaque::<3, 0xff_ffff>::empty();
        let rest = decoded.unpack(&mut packed.clone()).expect("unpack failed");
        assert!(rest.is_empty());
        assert_eq!(decoded, field);
    }

    #[test]
    fn constructor_rejects_oversized_payload() {
        assert!(fields::VarOpaque::<1, 32>::new(vec![0; 33]).is_err());
        assert!(fields::VarOpaque::<1, 32>::new(vec![0; 32]).is_ok());
    }

    #[test]
    fn list_with_partial_element_is_a_decode_error() {
        // Three payload bytes cannot hold whole u16 elements.
        let mut v = vec![0x00, 0x03, 0x00, 0x2f, 0x00];
        let err = fields::VarList::<fields::Uint16, 2, 0xfffe>::empty()
            .unpack(&mut v)
            .expect_err("ragged list decoded");
        assert!(matches!(err, TLSError::DecodeError(_)));
    }
}
