use bytes::Bytes;

use crate::varint::{VarInt, WriteVarInt, be_varint};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// NEW_TOKEN frame, handing the client a token for future connections.
///
/// ```text
/// NEW_TOKEN Frame {
///     Type (i) = 0x07,
///     Token Length (i),
///     Token (..),
/// }
/// ```
///
/// See [RFC 9000 Section 19.7](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.7).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewTokenFrame {
    token: Bytes,
}

impl NewTokenFrame {
    pub fn new(token: Bytes) -> Self {
        debug_assert!(!token.is_empty());
        Self { token }
    }

    pub fn token(&self) -> &Bytes {
        &self.token
    }
}

impl GetFrameType for NewTokenFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::NewToken
    }
}

impl EncodeFrame for NewTokenFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8 + self.token.len()
    }

    fn encoding_size(&self) -> usize {
        1 + VarInt::try_from(self.token.len())
            .expect("token length always fits in a varint")
            .encoding_size()
            + self.token.len()
    }
}

pub(super) fn be_new_token_frame(input: &[u8]) -> nom::IResult<&[u8], NewTokenFrame> {
    use nom::bytes::streaming::take;
    let (remain, length) = be_varint(input)?;
    if length.into_inner() == 0 {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    let (remain, token) = take(usize::from(length))(remain)?;
    Ok((
        remain,
        NewTokenFrame {
            token: Bytes::copy_from_slice(token),
        },
    ))
}

impl<T: bytes::BufMut> WriteFrame<NewTokenFrame> for T {
    fn put_frame(&mut self, frame: &NewTokenFrame) {
        self.put_u8(0x07);
        self.put_varint(
            &VarInt::try_from(frame.token.len()).expect("token length always fits in a varint"),
        );
        self.put_slice(&frame.token);
    }
}
