use crate::varint::{VarInt, WriteVarInt, be_varint};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// DATA_BLOCKED frame: the sender has data but is stopped by the
/// connection-level flow control limit.
///
/// ```text
/// DATA_BLOCKED Frame {
///     Type (i) = 0x14,
///     Maximum Data (i),
/// }
/// ```
///
/// See [RFC 9000 Section 19.12](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.12).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DataBlockedFrame {
    limit: VarInt,
}

impl DataBlockedFrame {
    pub fn new(limit: VarInt) -> Self {
        Self { limit }
    }

    /// The connection limit at which blocking occurred.
    pub fn limit(&self) -> u64 {
        self.limit.into_inner()
    }
}

impl GetFrameType for DataBlockedFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::DataBlocked
    }
}

impl EncodeFrame for DataBlockedFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8
    }

    fn encoding_size(&self) -> usize {
        1 + self.limit.encoding_size()
    }
}

pub(super) fn be_data_blocked_frame(input: &[u8]) -> nom::IResult<&[u8], DataBlockedFrame> {
    let (remain, limit) = be_varint(input)?;
    Ok((remain, DataBlockedFrame { limit }))
}

impl<T: bytes::BufMut> WriteFrame<DataBlockedFrame> for T {
    fn put_frame(&mut self, frame: &DataBlockedFrame) {
        self.put_u8(0x14);
        self.put_varint(&frame.limit);
    }
}
