use crate::{
    sid::{StreamId, WriteStreamId, be_streamid},
    varint::{VarInt, WriteVarInt, be_varint},
};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// RESET_STREAM frame, abruptly terminating the sending part of a stream.
///
/// ```text
/// RESET_STREAM Frame {
///     Type (i) = 0x04,
///     Stream ID (i),
///     Application Protocol Error Code (i),
///     Final Size (i),
/// }
/// ```
///
/// See [RFC 9000 Section 19.4](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.4).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ResetStreamFrame {
    stream_id: StreamId,
    app_error_code: VarInt,
    final_size: VarInt,
}

impl ResetStreamFrame {
    pub fn new(stream_id: StreamId, app_error_code: VarInt, final_size: VarInt) -> Self {
        Self {
            stream_id,
            app_error_code,
            final_size,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn app_error_code(&self) -> VarInt {
        self.app_error_code
    }

    pub fn final_size(&self) -> u64 {
        self.final_size.into_inner()
    }
}

impl GetFrameType for ResetStreamFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::ResetStream
    }
}

impl EncodeFrame for ResetStreamFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8 * 3
    }

    fn encoding_size(&self) -> usize {
        1 + VarInt::from(self.stream_id).encoding_size()
            + self.app_error_code.encoding_size()
            + self.final_size.encoding_size()
    }
}

pub(super) fn be_reset_stream_frame(input: &[u8]) -> nom::IResult<&[u8], ResetStreamFrame> {
    let (remain, stream_id) = be_streamid(input)?;
    let (remain, app_error_code) = be_varint(remain)?;
    let (remain, final_size) = be_varint(remain)?;
    Ok((
        remain,
        ResetStreamFrame {
            stream_id,
            app_error_code,
            final_size,
        },
    ))
}

impl<T: bytes::BufMut> WriteFrame<ResetStreamFrame> for T {
    fn put_frame(&mut self, frame: &ResetStreamFrame) {
        self.put_u8(0x04);
        self.put_streamid(&frame.stream_id);
        self.put_varint(&frame.app_error_code);
        self.put_varint(&frame.final_size);
    }
}
