use crate::varint::{VarInt, WriteVarInt, be_varint};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// RETIRE_CONNECTION_ID frame.
///
/// ```text
/// RETIRE_CONNECTION_ID Frame {
///     Type (i) = 0x19,
///     Sequence Number (i),
/// }
/// ```
///
/// See [RFC 9000 Section 19.16](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.16).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RetireConnectionIdFrame {
    sequence: VarInt,
}

impl RetireConnectionIdFrame {
    pub fn new(sequence: VarInt) -> Self {
        Self { sequence }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.into_inner()
    }
}

impl GetFrameType for RetireConnectionIdFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::RetireConnectionId
    }
}

impl EncodeFrame for RetireConnectionIdFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8
    }

    fn encoding_size(&self) -> usize {
        1 + self.sequence.encoding_size()
    }
}

pub(super) fn be_retire_connection_id_frame(
    input: &[u8],
) -> nom::IResult<&[u8], RetireConnectionIdFrame> {
    let (remain, sequence) = be_varint(input)?;
    Ok((remain, RetireConnectionIdFrame { sequence }))
}

impl<T: bytes::BufMut> WriteFrame<RetireConnectionIdFrame> for T {
    fn put_frame(&mut self, frame: &RetireConnectionIdFrame) {
        self.put_u8(0x19);
        self.put_varint(&frame.sequence);
    }
}
