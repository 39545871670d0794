use std::ops::Range;

use crate::{
    sid::{StreamId, WriteStreamId, be_streamid},
    varint::{VARINT_MAX, VarInt, WriteVarInt, be_varint},
};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteDataFrame};

const OFF_BIT: u8 = 0x04;
const LEN_BIT: u8 = 0x02;
const FIN_BIT: u8 = 0x01;

/// The most bytes a stream frame header can occupy:
/// type, stream id, offset and length all in their longest forms.
pub const STREAM_FRAME_MAX_ENCODING_SIZE: usize = 1 + 8 + 8 + 8;

/// STREAM frame, carrying a contiguous run of stream bytes.
///
/// ```text
/// STREAM Frame {
///     Type (i) = 0x08..0x0f,
///     Stream ID (i),
///     [Offset (i)],
///     [Length (i)],
///     Stream Data (..),
/// }
/// ```
///
/// See [RFC 9000 Section 19.8](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.8).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StreamFrame {
    id: StreamId,
    offset: VarInt,
    length: usize,
    flag: u8,
}

impl StreamFrame {
    /// Create a frame for data at `offset`. The length bit is always set so
    /// that other frames can follow in the same packet.
    pub fn new(id: StreamId, offset: u64, length: usize) -> Self {
        debug_assert!(offset + (length as u64) <= VARINT_MAX);
        let mut flag = LEN_BIT;
        if offset != 0 {
            flag |= OFF_BIT;
        }
        Self {
            id,
            offset: VarInt::from_u64(offset).expect("stream offset always fits in a varint"),
            length,
            flag,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.id
    }

    pub fn offset(&self) -> u64 {
        self.offset.into_inner()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The byte range of the stream this frame carries.
    pub fn range(&self) -> Range<u64> {
        self.offset()..self.offset() + self.length as u64
    }

    pub fn is_fin(&self) -> bool {
        self.flag & FIN_BIT != 0
    }

    pub fn set_fin(&mut self, fin: bool) {
        if fin {
            self.flag |= FIN_BIT;
        } else {
            self.flag &= !FIN_BIT;
        }
    }

    /// The length carried in the frame header, or `None` when the LEN bit is
    /// absent and the data extends to the end of the packet.
    pub(super) fn explicit_length(&self) -> Option<usize> {
        (self.flag & LEN_BIT != 0).then_some(self.length)
    }

    /// Fix the data length once it is known, checking the final offset stays
    /// within the varint space.
    pub(super) fn set_actual_length(&mut self, length: usize) -> Result<(), &'static str> {
        if self.offset() + length as u64 > VARINT_MAX {
            return Err("stream data would exceed the maximum stream offset");
        }
        self.length = length;
        Ok(())
    }
}

impl GetFrameType for StreamFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::Stream(self.flag)
    }
}

impl EncodeFrame for StreamFrame {
    fn max_encoding_size(&self) -> usize {
        STREAM_FRAME_MAX_ENCODING_SIZE
    }

    fn encoding_size(&self) -> usize {
        1 + VarInt::from(self.id).encoding_size()
            + if self.flag & OFF_BIT != 0 {
                self.offset.encoding_size()
            } else {
                0
            }
            + if self.flag & LEN_BIT != 0 {
                VarInt::try_from(self.length)
                    .expect("stream data length always fits in a varint")
                    .encoding_size()
            } else {
                0
            }
    }
}

/// Parse a STREAM frame body, the flag bits coming from the frame type.
pub(super) fn be_stream_frame(input: &[u8], flag: u8) -> nom::IResult<&[u8], StreamFrame> {
    let (remain, id) = be_streamid(input)?;
    let (remain, offset) = if flag & OFF_BIT != 0 {
        be_varint(remain)?
    } else {
        (remain, VarInt::ZERO)
    };
    let (remain, length) = if flag & LEN_BIT != 0 {
        let (remain, length) = be_varint(remain)?;
        (remain, usize::from(length))
    } else {
        (remain, 0)
    };
    Ok((
        remain,
        StreamFrame {
            id,
            offset,
            length,
            flag,
        },
    ))
}

impl<T: bytes::BufMut> WriteDataFrame<StreamFrame> for T {
    fn put_data_frame(&mut self, frame: &StreamFrame, data: &[u8]) {
        debug_assert_eq!(frame.length, data.len());
        self.put_u8(0x08 | frame.flag);
        self.put_streamid(&frame.id);
        if frame.flag & OFF_BIT != 0 {
            self.put_varint(&frame.offset);
        }
        if frame.flag & LEN_BIT != 0 {
            self.put_varint(
                &VarInt::try_from(frame.length)
                    .expect("stream data length always fits in a varint"),
            );
        }
        self.put_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::sid::{Dir, Role};

    #[test]
    fn test_roundtrip() {
        let id = StreamId::new(Role::Client, Dir::Bi, 2);
        let mut frame = StreamFrame::new(id, 4096, 5);
        frame.set_fin(true);
        let mut buf = BytesMut::new();
        buf.put_data_frame(&frame, b"hello");

        assert_eq!(buf.len(), frame.encoding_size() + 5);
        let flag = buf[0] & 0b111;
        let (remain, decoded) = be_stream_frame(&buf[1..], flag).unwrap();
        assert_eq!(remain, b"hello");
        assert_eq!(decoded, frame);
        assert!(decoded.is_fin());
        assert_eq!(decoded.range(), 4096..4101);
    }

    #[test]
    fn test_zero_offset_omitted() {
        let id = StreamId::new(Role::Client, Dir::Bi, 0);
        let frame = StreamFrame::new(id, 0, 1);
        // type + stream id + length, no offset field
        assert_eq!(frame.encoding_size(), 3);
    }

    #[test]
    fn test_offset_overflow() {
        let id = StreamId::new(Role::Client, Dir::Bi, 0);
        let mut frame = StreamFrame::new(id, VARINT_MAX - 1, 0);
        assert!(frame.set_actual_length(2).is_err());
        assert!(frame.set_actual_length(1).is_ok());
    }
}
