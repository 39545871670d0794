use std::ops::Range;

use crate::varint::{VarInt, WriteVarInt, be_varint};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteDataFrame};

/// CRYPTO frame, carrying handshake bytes outside any stream.
///
/// ```text
/// CRYPTO Frame {
///     Type (i) = 0x06,
///     Offset (i),
///     Length (i),
///     Crypto Data (..),
/// }
/// ```
///
/// See [RFC 9000 Section 19.6](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.6).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CryptoFrame {
    offset: VarInt,
    length: VarInt,
}

impl CryptoFrame {
    pub fn new(offset: VarInt, length: VarInt) -> Self {
        Self { offset, length }
    }

    pub fn offset(&self) -> u64 {
        self.offset.into_inner()
    }

    pub fn length(&self) -> VarInt {
        self.length
    }

    pub fn range(&self) -> Range<u64> {
        self.offset()..self.offset() + self.length.into_inner()
    }
}

impl GetFrameType for CryptoFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::Crypto
    }
}

impl EncodeFrame for CryptoFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8 + 8
    }

    fn encoding_size(&self) -> usize {
        1 + self.offset.encoding_size() + self.length.encoding_size()
    }
}

pub(super) fn be_crypto_frame(input: &[u8]) -> nom::IResult<&[u8], CryptoFrame> {
    let (remain, offset) = be_varint(input)?;
    let (remain, length) = be_varint(remain)?;
    Ok((remain, CryptoFrame { offset, length }))
}

impl<T: bytes::BufMut> WriteDataFrame<CryptoFrame> for T {
    fn put_data_frame(&mut self, frame: &CryptoFrame, data: &[u8]) {
        debug_assert_eq!(usize::from(frame.length), data.len());
        self.put_u8(0x06);
        self.put_varint(&frame.offset);
        self.put_varint(&frame.length);
        self.put_slice(data);
    }
}
