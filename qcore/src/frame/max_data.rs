use crate::varint::{VarInt, WriteVarInt, be_varint};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// MAX_DATA frame, raising the connection-level flow control limit.
///
/// ```text
/// MAX_DATA Frame {
///     Type (i) = 0x10,
///     Maximum Data (i),
/// }
/// ```
///
/// See [RFC 9000 Section 19.9](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.9).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MaxDataFrame {
    max_data: VarInt,
}

impl MaxDataFrame {
    pub fn new(max_data: VarInt) -> Self {
        Self { max_data }
    }

    pub fn max_data(&self) -> u64 {
        self.max_data.into_inner()
    }
}

impl GetFrameType for MaxDataFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::MaxData
    }
}

impl EncodeFrame for MaxDataFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8
    }

    fn encoding_size(&self) -> usize {
        1 + self.max_data.encoding_size()
    }
}

pub(super) fn be_max_data_frame(input: &[u8]) -> nom::IResult<&[u8], MaxDataFrame> {
    let (remain, max_data) = be_varint(input)?;
    Ok((remain, MaxDataFrame { max_data }))
}

impl<T: bytes::BufMut> WriteFrame<MaxDataFrame> for T {
    fn put_frame(&mut self, frame: &MaxDataFrame) {
        self.put_u8(0x10);
        self.put_varint(&frame.max_data);
    }
}
