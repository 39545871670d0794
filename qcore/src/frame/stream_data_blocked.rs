use crate::{
    sid::{StreamId, WriteStreamId, be_streamid},
    varint::{VarInt, WriteVarInt, be_varint},
};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// STREAM_DATA_BLOCKED frame: the sender has data for a stream but is
/// stopped by that stream's flow control limit.
///
/// ```text
/// STREAM_DATA_BLOCKED Frame {
///     Type (i) = 0x15,
///     Stream ID (i),
///     Maximum Stream Data (i),
/// }
/// ```
///
/// See [RFC 9000 Section 19.13](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.13).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StreamDataBlockedFrame {
    stream_id: StreamId,
    limit: VarInt,
}

impl StreamDataBlockedFrame {
    pub fn new(stream_id: StreamId, limit: VarInt) -> Self {
        Self { stream_id, limit }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn limit(&self) -> u64 {
        self.limit.into_inner()
    }
}

impl GetFrameType for StreamDataBlockedFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::StreamDataBlocked
    }
}

impl EncodeFrame for StreamDataBlockedFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8 * 2
    }

    fn encoding_size(&self) -> usize {
        1 + VarInt::from(self.stream_id).encoding_size() + self.limit.encoding_size()
    }
}

pub(super) fn be_stream_data_blocked_frame(
    input: &[u8],
) -> nom::IResult<&[u8], StreamDataBlockedFrame> {
    let (remain, stream_id) = be_streamid(input)?;
    let (remain, limit) = be_varint(remain)?;
    Ok((remain, StreamDataBlockedFrame { stream_id, limit }))
}

impl<T: bytes::BufMut> WriteFrame<StreamDataBlockedFrame> for T {
    fn put_frame(&mut self, frame: &StreamDataBlockedFrame) {
        self.put_u8(0x15);
        self.put_streamid(&frame.stream_id);
        self.put_varint(&frame.limit);
    }
}
