use super::{EncodeFrame, FrameType, GetFrameType, PathChallengeFrame, io::WriteFrame};

/// PATH_RESPONSE frame, echoing the data of a PATH_CHALLENGE.
///
/// ```text
/// PATH_RESPONSE Frame {
///     Type (i) = 0x1b,
///     Data (64),
/// }
/// ```
///
/// See [RFC 9000 Section 19.18](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.18).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PathResponseFrame {
    data: [u8; 8],
}

impl PathResponseFrame {
    pub fn data(&self) -> &[u8; 8] {
        &self.data
    }

    /// Whether this response answers the given challenge.
    pub fn answers(&self, challenge: &PathChallengeFrame) -> bool {
        &self.data == challenge.data()
    }
}

impl From<&PathChallengeFrame> for PathResponseFrame {
    fn from(challenge: &PathChallengeFrame) -> Self {
        Self {
            data: *challenge.data(),
        }
    }
}

impl GetFrameType for PathResponseFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::PathResponse
    }
}

impl EncodeFrame for PathResponseFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8
    }

    fn encoding_size(&self) -> usize {
        1 + 8
    }
}

pub(super) fn be_path_response_frame(input: &[u8]) -> nom::IResult<&[u8], PathResponseFrame> {
    use nom::bytes::streaming::take;
    let (remain, data) = take(8usize)(input)?;
    let mut bytes = [0; 8];
    bytes.copy_from_slice(data);
    Ok((remain, PathResponseFrame { data: bytes }))
}

impl<T: bytes::BufMut> WriteFrame<PathResponseFrame> for T {
    fn put_frame(&mut self, frame: &PathResponseFrame) {
        self.put_u8(0x1b);
        self.put_slice(&frame.data);
    }
}
