use crate::{
    sid::Dir,
    varint::{VarInt, WriteVarInt, be_varint},
};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// MAX_STREAMS frame, raising the cumulative count of streams of one
/// directionality the peer may open.
///
/// ```text
/// MAX_STREAMS Frame {
///     Type (i) = 0x12..0x13,
///     Maximum Streams (i),
/// }
/// ```
///
/// See [RFC 9000 Section 19.11](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.11).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MaxStreamsFrame {
    dir: Dir,
    max_streams: VarInt,
}

impl MaxStreamsFrame {
    pub fn new(dir: Dir, max_streams: VarInt) -> Self {
        Self { dir, max_streams }
    }

    pub fn dir(&self) -> Dir {
        self.dir
    }

    pub fn max_streams(&self) -> u64 {
        self.max_streams.into_inner()
    }
}

impl GetFrameType for MaxStreamsFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::MaxStreams(match self.dir {
            Dir::Bi => 0,
            Dir::Uni => 1,
        })
    }
}

impl EncodeFrame for MaxStreamsFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8
    }

    fn encoding_size(&self) -> usize {
        1 + self.max_streams.encoding_size()
    }
}

pub(super) fn be_max_streams_frame(input: &[u8], dir: u8) -> nom::IResult<&[u8], MaxStreamsFrame> {
    let (remain, max_streams) = be_varint(input)?;
    Ok((
        remain,
        MaxStreamsFrame {
            dir: if dir == 0 { Dir::Bi } else { Dir::Uni },
            max_streams,
        },
    ))
}

impl<T: bytes::BufMut> WriteFrame<MaxStreamsFrame> for T {
    fn put_frame(&mut self, frame: &MaxStreamsFrame) {
        self.put_u8(match frame.dir {
            Dir::Bi => 0x12,
            Dir::Uni => 0x13,
        });
        self.put_varint(&frame.max_streams);
    }
}
