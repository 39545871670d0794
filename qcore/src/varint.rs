use std::fmt;

use bytes::BufMut;

/// The largest value a [`VarInt`] can represent: 2^62 - 1.
pub const VARINT_MAX: u64 = 0x3fff_ffff_ffff_ffff;

/// An integer less than 2^62, encoded on the wire in 1, 2, 4 or 8 bytes.
///
/// The length of the encoding is carried in the two most significant bits
/// of the first byte. See [RFC 9000 Section 16](https://www.rfc-editor.org/rfc/rfc9000.html#section-16).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarInt(u64);

/// Error returned when a value is too large to be encoded as a [`VarInt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("value({0}) too large for varint encoding")]
pub struct Overflow(u64);

impl VarInt {
    /// The varint zero.
    pub const ZERO: Self = Self(0);
    /// The largest representable varint, 2^62 - 1.
    pub const MAX: Self = Self(VARINT_MAX);

    /// Create a varint from a value already known to fit in 62 bits.
    pub fn from_u32(value: u32) -> Self {
        Self(value as u64)
    }

    /// Try to create a varint, failing if the value needs more than 62 bits.
    pub fn from_u64(value: u64) -> Result<Self, Overflow> {
        if value <= VARINT_MAX {
            Ok(Self(value))
        } else {
            Err(Overflow(value))
        }
    }

    /// Return the inner value.
    pub fn into_inner(self) -> u64 {
        self.0
    }

    /// The number of bytes this varint occupies on the wire.
    pub fn encoding_size(&self) -> usize {
        match self.0 {
            0..=0x3f => 1,
            0x40..=0x3fff => 2,
            0x4000..=0x3fff_ffff => 4,
            _ => 8,
        }
    }

    /// Saturating addition that never exceeds [`VARINT_MAX`].
    pub fn saturating_add(self, rhs: impl Into<VarInt>) -> Self {
        Self(self.0.saturating_add(rhs.into().0).min(VARINT_MAX))
    }
}

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u8> for VarInt {
    fn from(value: u8) -> Self {
        Self(value as u64)
    }
}

impl From<u16> for VarInt {
    fn from(value: u16) -> Self {
        Self(value as u64)
    }
}

impl From<u32> for VarInt {
    fn from(value: u32) -> Self {
        Self(value as u64)
    }
}

impl TryFrom<u64> for VarInt {
    type Error = Overflow;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_u64(value)
    }
}

impl TryFrom<usize> for VarInt {
    type Error = Overflow;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::from_u64(value as u64)
    }
}

impl From<VarInt> for u64 {
    fn from(varint: VarInt) -> Self {
        varint.0
    }
}

impl From<VarInt> for usize {
    fn from(varint: VarInt) -> Self {
        varint.0 as usize
    }
}

/// Parse a variable-length integer from the input buffer,
/// [nom](https://docs.rs/nom/latest/nom/) parser style.
pub fn be_varint(input: &[u8]) -> nom::IResult<&[u8], VarInt> {
    use nom::{bytes::streaming::take, number::streaming::be_u8};
    let (remain, first) = be_u8(input)?;
    let len = 1usize << (first >> 6);
    let (remain, rest) = take(len - 1)(remain)?;
    let mut value = (first & 0b0011_1111) as u64;
    for byte in rest {
        value = value << 8 | *byte as u64;
    }
    Ok((remain, VarInt(value)))
}

/// A [`bytes::BufMut`] extension trait, makes buf writable for [`VarInt`].
pub trait WriteVarInt {
    /// Encode the varint to the buffer with the shortest form.
    fn put_varint(&mut self, value: &VarInt);
}

impl<T: BufMut> WriteVarInt for T {
    fn put_varint(&mut self, value: &VarInt) {
        let value = value.0;
        match value {
            0..=0x3f => self.put_u8(value as u8),
            0x40..=0x3fff => self.put_u16(value as u16 | 0x4000),
            0x4000..=0x3fff_ffff => self.put_u32(value as u32 | 0x8000_0000),
            _ => self.put_u64(value | 0xc000_0000_0000_0000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_size() {
        assert_eq!(VarInt::from_u32(0).encoding_size(), 1);
        assert_eq!(VarInt::from_u32(63).encoding_size(), 1);
        assert_eq!(VarInt::from_u32(64).encoding_size(), 2);
        assert_eq!(VarInt::from_u32(16383).encoding_size(), 2);
        assert_eq!(VarInt::from_u32(16384).encoding_size(), 4);
        assert_eq!(VarInt::MAX.encoding_size(), 8);
    }

    #[test]
    fn test_rfc9000_appendix_a1_samples() {
        // the four sample encodings from RFC 9000 Appendix A.1
        let samples: [(&[u8], u64); 4] = [
            (&[0x25], 37),
            (&[0x7b, 0xbd], 15293),
            (&[0x9d, 0x7f, 0x3e, 0x7d], 494_878_333),
            (
                &[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c],
                151_288_809_941_952_652,
            ),
        ];
        for (wire, value) in samples {
            let (remain, varint) = be_varint(wire).unwrap();
            assert!(remain.is_empty());
            assert_eq!(varint.into_inner(), value);
        }
    }

    #[test]
    fn test_roundtrip() {
        for value in [0, 63, 64, 16383, 16384, 0x3fff_ffff, 0x4000_0000, VARINT_MAX] {
            let varint = VarInt::from_u64(value).unwrap();
            let mut buf = bytes::BytesMut::new();
            buf.put_varint(&varint);
            assert_eq!(buf.len(), varint.encoding_size());
            let (remain, decoded) = be_varint(&buf).unwrap();
            assert!(remain.is_empty());
            assert_eq!(decoded, varint);
        }
    }

    #[test]
    fn test_overflow() {
        assert!(VarInt::from_u64(VARINT_MAX).is_ok());
        assert!(VarInt::from_u64(VARINT_MAX + 1).is_err());
        assert_eq!(VarInt::MAX.saturating_add(VarInt::MAX), VarInt::MAX);
    }

    #[test]
    fn test_incomplete_input() {
        // 4-byte form with only 2 bytes available
        assert!(be_varint(&[0x9d, 0x7f]).is_err());
        assert!(be_varint(&[]).is_err());
    }
}
