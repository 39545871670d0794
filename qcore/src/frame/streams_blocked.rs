use crate::{
    sid::Dir,
    varint::{VarInt, WriteVarInt, be_varint},
};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// STREAMS_BLOCKED frame: the sender wishes to open a stream but is
/// stopped by the peer's stream count limit.
///
/// ```text
/// STREAMS_BLOCKED Frame {
///     Type (i) = 0x16..0x17,
///     Maximum Streams (i),
/// }
/// ```
///
/// See [RFC 9000 Section 19.14](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.14).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StreamsBlockedFrame {
    dir: Dir,
    limit: VarInt,
}

impl StreamsBlockedFrame {
    pub fn new(dir: Dir, limit: VarInt) -> Self {
        Self { dir, limit }
    }

    pub fn dir(&self) -> Dir {
        self.dir
    }

    /// The stream count limit at which blocking occurred.
    pub fn stream_limit(&self) -> u64 {
        self.limit.into_inner()
    }
}

impl GetFrameType for StreamsBlockedFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::StreamsBlocked(match self.dir {
            Dir::Bi => 0,
            Dir::Uni => 1,
        })
    }
}

impl EncodeFrame for StreamsBlockedFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8
    }

    fn encoding_size(&self) -> usize {
        1 + self.limit.encoding_size()
    }
}

pub(super) fn be_streams_blocked_frame(
    input: &[u8],
    dir: u8,
) -> nom::IResult<&[u8], StreamsBlockedFrame> {
    let (remain, limit) = be_varint(input)?;
    Ok((
        remain,
        StreamsBlockedFrame {
            dir: if dir == 0 { Dir::Bi } else { Dir::Uni },
            limit,
        },
    ))
}

impl<T: bytes::BufMut> WriteFrame<StreamsBlockedFrame> for T {
    fn put_frame(&mut self, frame: &StreamsBlockedFrame) {
        self.put_u8(match frame.dir {
            Dir::Bi => 0x16,
            Dir::Uni => 0x17,
        });
        self.put_varint(&frame.limit);
    }
}
