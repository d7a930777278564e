use crate::errors;

use byteorder::{BigEndian, ByteOrder};
use std::fmt;

pub type NetVec<T> = Vec<T>;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Uint8(pub u8);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Uint16(pub u16);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Uint32(pub u32);

// In network order (Big Endian)
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Uint24(pub [u8; 3]);

pub fn uint24_to_u32(i: Uint24) -> u32 {
    BigEndian::read_u24(&i.0)
}

pub fn uint24_from_be_bytes(bytes: [u8; 3]) -> Uint24 {
    Uint24(bytes)
}

pub fn uint24_from_u32(i: u32) -> Result<Uint24, errors::TLSError> {
    if i > 0x00ff_ffff {
        return Err(errors::TLSError::LengthOverflowError {
            declared: i as usize,
            max: 0x00ff_ffff,
        });
    }
    let mut bytes = [0; 3];
    BigEndian::write_u24(&mut bytes, i);
    Ok(Uint24(bytes))
}

/// Exactly `N` bytes on the wire, no length prefix.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct FixedOpaque<const N: usize>(pub [u8; N]);

impl<const N: usize> FixedOpaque<N> {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl<const N: usize> fmt::Debug for FixedOpaque<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x?}", &self.0[..])
    }
}

/// Opaque bytes behind an `L`-byte big-endian length prefix, holding at most `MAX` bytes.
#[derive(Clone, Default, Eq, Hash, PartialEq)]
pub struct VarOpaque<const L: usize, const MAX: usize>(Vec<u8>);

impl<const L: usize, const MAX: usize> VarOpaque<L, MAX> {
    pub fn new(v: Vec<u8>) -> Result<Self, errors::TLSError> {
        if v.len() > MAX {
            return Err(errors::TLSError::LengthOverflowError { declared: v.len(), max: MAX });
        }
        Ok(Self(v))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn payload_len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn set_unchecked(&mut self, v: Vec<u8>) {
        debug_assert!(v.len() <= MAX);
        self.0 = v;
    }
}

impl<const L: usize, const MAX: usize> fmt::Debug for VarOpaque<L, MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x?}", self.0)
    }
}

/// A list of `T` whose encoded byte length sits in an `L`-byte prefix, at most `MAX` bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VarList<T, const L: usize, const MAX: usize> {
    items: Vec<T>,
}

impl<T, const L: usize, const MAX: usize> VarList<T, L, MAX>
where
    T: crate::pack::Pack,
{
    pub fn new(items: Vec<T>) -> Result<Self, errors::TLSError> {
        let length: usize = items.iter().map(|i| i.len()).sum();
        if length > MAX {
            return Err(errors::TLSError::LengthOverflowError { declared: length, max: MAX });
        }
        Ok(Self { items })
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub(crate) fn set_items_unchecked(&mut self, items: Vec<T>) {
        self.items = items;
    }
}

impl<T, const L: usize, const MAX: usize> Default for VarList<T, L, MAX> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}
