use crate::{
    sid::{StreamId, WriteStreamId, be_streamid},
    varint::{VarInt, WriteVarInt, be_varint},
};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// MAX_STREAM_DATA frame, raising one stream's flow control limit.
///
/// ```text
/// MAX_STREAM_DATA Frame {
///     Type (i) = 0x11,
///     Stream ID (i),
///     Maximum Stream Data (i),
/// }
/// ```
///
/// See [RFC 9000 Section 19.10](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.10).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MaxStreamDataFrame {
    stream_id: StreamId,
    max_stream_data: VarInt,
}

impl MaxStreamDataFrame {
    pub fn new(stream_id: StreamId, max_stream_data: VarInt) -> Self {
        Self {
            stream_id,
            max_stream_data,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn max_stream_data(&self) -> u64 {
        self.max_stream_data.into_inner()
    }
}

impl GetFrameType for MaxStreamDataFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::MaxStreamData
    }
}

impl EncodeFrame for MaxStreamDataFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8 * 2
    }

    fn encoding_size(&self) -> usize {
        1 + VarInt::from(self.stream_id).encoding_size() + self.max_stream_data.encoding_size()
    }
}

pub(super) fn be_max_stream_data_frame(input: &[u8]) -> nom::IResult<&[u8], MaxStreamDataFrame> {
    let (remain, stream_id) = be_streamid(input)?;
    let (remain, max_stream_data) = be_varint(remain)?;
    Ok((
        remain,
        MaxStreamDataFrame {
            stream_id,
            max_stream_data,
        },
    ))
}

impl<T: bytes::BufMut> WriteFrame<MaxStreamDataFrame> for T {
    fn put_frame(&mut self, frame: &MaxStreamDataFrame) {
        self.put_u8(0x11);
        self.put_streamid(&frame.stream_id);
        self.put_varint(&frame.max_stream_data);
    }
}
