use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// PATH_CHALLENGE frame, probing reachability of a network path.
///
/// ```text
/// PATH_CHALLENGE Frame {
///     Type (i) = 0x1a,
///     Data (64),
/// }
/// ```
///
/// See [RFC 9000 Section 19.17](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.17).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PathChallengeFrame {
    data: [u8; 8],
}

impl PathChallengeFrame {
    pub fn from_random() -> Self {
        Self {
            data: rand::random(),
        }
    }

    pub fn data(&self) -> &[u8; 8] {
        &self.data
    }
}

impl From<[u8; 8]> for PathChallengeFrame {
    fn from(data: [u8; 8]) -> Self {
        Self { data }
    }
}

impl GetFrameType for PathChallengeFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::PathChallenge
    }
}

impl EncodeFrame for PathChallengeFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8
    }

    fn encoding_size(&self) -> usize {
        1 + 8
    }
}

pub(super) fn be_path_challenge_frame(input: &[u8]) -> nom::IResult<&[u8], PathChallengeFrame> {
    use nom::bytes::streaming::take;
    let (remain, data) = take(8usize)(input)?;
    let mut bytes = [0; 8];
    bytes.copy_from_slice(data);
    Ok((remain, PathChallengeFrame { data: bytes }))
}

impl<T: bytes::BufMut> WriteFrame<PathChallengeFrame> for T {
    fn put_frame(&mut self, frame: &PathChallengeFrame) {
        self.put_u8(0x1a);
        self.put_slice(&frame.data);
    }
}
