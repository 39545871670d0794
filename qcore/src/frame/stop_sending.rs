use crate::{
    sid::{StreamId, WriteStreamId, be_streamid},
    varint::{VarInt, WriteVarInt, be_varint},
};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// STOP_SENDING frame, asking the peer to cease transmission on a stream.
///
/// ```text
/// STOP_SENDING Frame {
///     Type (i) = 0x05,
///     Stream ID (i),
///     Application Protocol Error Code (i),
/// }
/// ```
///
/// See [RFC 9000 Section 19.5](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.5).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StopSendingFrame {
    stream_id: StreamId,
    app_error_code: VarInt,
}

impl StopSendingFrame {
    pub fn new(stream_id: StreamId, app_error_code: VarInt) -> Self {
        Self {
            stream_id,
            app_error_code,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn app_error_code(&self) -> VarInt {
        self.app_error_code
    }
}

impl GetFrameType for StopSendingFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::StopSending
    }
}

impl EncodeFrame for StopSendingFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8 * 2
    }

    fn encoding_size(&self) -> usize {
        1 + VarInt::from(self.stream_id).encoding_size() + self.app_error_code.encoding_size()
    }
}

pub(super) fn be_stop_sending_frame(input: &[u8]) -> nom::IResult<&[u8], StopSendingFrame> {
    let (remain, stream_id) = be_streamid(input)?;
    let (remain, app_error_code) = be_varint(remain)?;
    Ok((
        remain,
        StopSendingFrame {
            stream_id,
            app_error_code,
        },
    ))
}

impl<T: bytes::BufMut> WriteFrame<StopSendingFrame> for T {
    fn put_frame(&mut self, frame: &StopSendingFrame) {
        self.put_u8(0x05);
        self.put_streamid(&frame.stream_id);
        self.put_varint(&frame.app_error_code);
    }
}
