use std::borrow::Cow;

use crate::{
    error::{AppError, Error, ErrorKind, QuicError},
    varint::{VarInt, WriteVarInt, be_varint},
};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// CONNECTION_CLOSE frame of type 0x1c, carrying a transport error.
///
/// ```text
/// CONNECTION_CLOSE Frame {
///     Type (i) = 0x1c..0x1d,
///     Error Code (i),
///     [Frame Type (i)],
///     Reason Phrase Length (i),
///     Reason Phrase (..),
/// }
/// ```
///
/// See [RFC 9000 Section 19.19](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.19).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct QuicCloseFrame {
    error_code: VarInt,
    frame_type: VarInt,
    reason: Cow<'static, str>,
}

/// CONNECTION_CLOSE frame of type 0x1d, carrying an application error.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AppCloseFrame {
    error_code: VarInt,
    reason: Cow<'static, str>,
}

/// Either layer's CONNECTION_CLOSE frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ConnectionCloseFrame {
    Quic(QuicCloseFrame),
    App(AppCloseFrame),
}

impl QuicCloseFrame {
    pub fn error_kind(&self) -> ErrorKind {
        ErrorKind::try_from(self.error_code).unwrap_or(ErrorKind::ProtocolViolation)
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl AppCloseFrame {
    pub fn error_code(&self) -> VarInt {
        self.error_code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<&QuicError> for QuicCloseFrame {
    fn from(error: &QuicError) -> Self {
        Self {
            error_code: error.kind().into(),
            frame_type: error.frame_type().into(),
            reason: Cow::Owned(error.reason().to_string()),
        }
    }
}

impl From<&AppError> for AppCloseFrame {
    fn from(error: &AppError) -> Self {
        Self {
            error_code: error.error_code(),
            reason: Cow::Owned(error.reason().to_string()),
        }
    }
}

impl From<&Error> for ConnectionCloseFrame {
    fn from(error: &Error) -> Self {
        match error {
            Error::Quic(e) => ConnectionCloseFrame::Quic(e.into()),
            Error::App(e) => ConnectionCloseFrame::App(e.into()),
        }
    }
}

impl GetFrameType for ConnectionCloseFrame {
    fn frame_type(&self) -> FrameType {
        match self {
            ConnectionCloseFrame::Quic(_) => FrameType::ConnectionClose(0),
            ConnectionCloseFrame::App(_) => FrameType::ConnectionClose(1),
        }
    }
}

impl EncodeFrame for ConnectionCloseFrame {
    fn max_encoding_size(&self) -> usize {
        let reason = match self {
            ConnectionCloseFrame::Quic(frame) => frame.reason.len(),
            ConnectionCloseFrame::App(frame) => frame.reason.len(),
        };
        1 + 8 * 3 + reason
    }

    fn encoding_size(&self) -> usize {
        let reason_size = |reason: &str| {
            VarInt::try_from(reason.len())
                .expect("reason length always fits in a varint")
                .encoding_size()
                + reason.len()
        };
        match self {
            ConnectionCloseFrame::Quic(frame) => {
                1 + frame.error_code.encoding_size()
                    + frame.frame_type.encoding_size()
                    + reason_size(&frame.reason)
            }
            ConnectionCloseFrame::App(frame) => {
                1 + frame.error_code.encoding_size() + reason_size(&frame.reason)
            }
        }
    }
}

pub(super) fn be_connection_close_frame(
    input: &[u8],
    layer: u8,
) -> nom::IResult<&[u8], ConnectionCloseFrame> {
    use nom::bytes::streaming::take;
    let (remain, error_code) = be_varint(input)?;
    let (remain, frame_type) = if layer == 0 {
        be_varint(remain)?
    } else {
        (remain, VarInt::ZERO)
    };
    let (remain, reason_length) = be_varint(remain)?;
    let (remain, reason) = take(usize::from(reason_length))(remain)?;
    let reason = Cow::Owned(String::from_utf8_lossy(reason).into_owned());
    let frame = if layer == 0 {
        ConnectionCloseFrame::Quic(QuicCloseFrame {
            error_code,
            frame_type,
            reason,
        })
    } else {
        ConnectionCloseFrame::App(AppCloseFrame { error_code, reason })
    };
    Ok((remain, frame))
}

impl<T: bytes::BufMut> WriteFrame<ConnectionCloseFrame> for T {
    fn put_frame(&mut self, frame: &ConnectionCloseFrame) {
        match frame {
            ConnectionCloseFrame::Quic(frame) => {
                self.put_u8(0x1c);
                self.put_varint(&frame.error_code);
                self.put_varint(&frame.frame_type);
                self.put_varint(
                    &VarInt::try_from(frame.reason.len())
                        .expect("reason length always fits in a varint"),
                );
                self.put_slice(frame.reason.as_bytes());
            }
            ConnectionCloseFrame::App(frame) => {
                self.put_u8(0x1d);
                self.put_varint(&frame.error_code);
                self.put_varint(
                    &VarInt::try_from(frame.reason.len())
                        .expect("reason length always fits in a varint"),
                );
                self.put_slice(frame.reason.as_bytes());
            }
        }
    }
}
