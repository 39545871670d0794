use crate::{
    cid::{ConnectionId, WriteConnectionId, be_connection_id},
    varint::{VarInt, WriteVarInt, be_varint},
};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// The stateless reset token bound to a connection ID.
pub const RESET_TOKEN_SIZE: usize = 16;

/// NEW_CONNECTION_ID frame.
///
/// ```text
/// NEW_CONNECTION_ID Frame {
///     Type (i) = 0x18,
///     Sequence Number (i),
///     Retire Prior To (i),
///     Length (8),
///     Connection ID (8..160),
///     Stateless Reset Token (128),
/// }
/// ```
///
/// See [RFC 9000 Section 19.15](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.15).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct NewConnectionIdFrame {
    sequence: VarInt,
    retire_prior_to: VarInt,
    cid: ConnectionId,
    reset_token: [u8; RESET_TOKEN_SIZE],
}

impl NewConnectionIdFrame {
    pub fn new(
        sequence: VarInt,
        retire_prior_to: VarInt,
        cid: ConnectionId,
        reset_token: [u8; RESET_TOKEN_SIZE],
    ) -> Self {
        debug_assert!(retire_prior_to <= sequence);
        Self {
            sequence,
            retire_prior_to,
            cid,
            reset_token,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.into_inner()
    }

    pub fn retire_prior_to(&self) -> u64 {
        self.retire_prior_to.into_inner()
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.cid
    }

    pub fn reset_token(&self) -> &[u8; RESET_TOKEN_SIZE] {
        &self.reset_token
    }
}

impl GetFrameType for NewConnectionIdFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::NewConnectionId
    }
}

impl EncodeFrame for NewConnectionIdFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8 * 2 + 1 + self.cid.len() + RESET_TOKEN_SIZE
    }

    fn encoding_size(&self) -> usize {
        1 + self.sequence.encoding_size()
            + self.retire_prior_to.encoding_size()
            + 1
            + self.cid.len()
            + RESET_TOKEN_SIZE
    }
}

pub(super) fn be_new_connection_id_frame(
    input: &[u8],
) -> nom::IResult<&[u8], NewConnectionIdFrame> {
    use nom::bytes::streaming::take;
    let (remain, sequence) = be_varint(input)?;
    let (remain, retire_prior_to) = be_varint(remain)?;
    if retire_prior_to > sequence {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    let (remain, cid) = be_connection_id(remain)?;
    // a zero-length cid must not be issued through this frame
    if cid.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    let (remain, token) = take(RESET_TOKEN_SIZE)(remain)?;
    let mut reset_token = [0; RESET_TOKEN_SIZE];
    reset_token.copy_from_slice(token);
    Ok((
        remain,
        NewConnectionIdFrame {
            sequence,
            retire_prior_to,
            cid,
            reset_token,
        },
    ))
}

impl<T: bytes::BufMut> WriteFrame<NewConnectionIdFrame> for T {
    fn put_frame(&mut self, frame: &NewConnectionIdFrame) {
        self.put_u8(0x18);
        self.put_varint(&frame.sequence);
        self.put_varint(&frame.retire_prior_to);
        self.put_connection_id(&frame.cid);
        self.put_slice(&frame.reset_token);
    }
}
