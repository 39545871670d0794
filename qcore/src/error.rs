use std::borrow::Cow;

use crate::{frame::FrameType, varint::VarInt};

/// Transport error codes from
/// [RFC 9000 Section 20.1](https://www.rfc-editor.org/rfc/rfc9000.html#section-20.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("the connection is being closed abruptly in the absence of any error")]
    None,
    #[error("the endpoint encountered an internal error")]
    Internal,
    #[error("the server refused to accept the new connection")]
    ConnectionRefused,
    #[error("received more data than permitted in advertised data limits")]
    FlowControl,
    #[error("received a frame for a stream identifier that exceeded advertised limits")]
    StreamLimit,
    #[error("received a frame for a stream that was not in a permitted state")]
    StreamState,
    #[error("received a STREAM frame or a RESET_STREAM frame containing a different final size")]
    FinalSize,
    #[error("received a frame that was badly formatted")]
    FrameEncoding,
    #[error("received transport parameters that were badly formatted")]
    TransportParameter,
    #[error("the number of connection IDs provided exceeded the advertised limit")]
    ConnectionIdLimit,
    #[error("detected an error with protocol compliance")]
    ProtocolViolation,
    #[error("received an invalid Retry Token")]
    InvalidToken,
    #[error("the application or application protocol caused the connection to be closed")]
    Application,
    #[error("received more data in CRYPTO frames than can be buffered")]
    CryptoBufferExceeded,
    #[error("key update error")]
    KeyUpdate,
    #[error("the endpoint has reached the confidentiality or integrity limit for the AEAD")]
    AeadLimitReached,
    #[error("no viable network path exists")]
    NoViablePath,
    #[error("crypto error: {0}")]
    Crypto(u8),
}

impl From<ErrorKind> for VarInt {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::None => VarInt::from_u32(0x00),
            ErrorKind::Internal => VarInt::from_u32(0x01),
            ErrorKind::ConnectionRefused => VarInt::from_u32(0x02),
            ErrorKind::FlowControl => VarInt::from_u32(0x03),
            ErrorKind::StreamLimit => VarInt::from_u32(0x04),
            ErrorKind::StreamState => VarInt::from_u32(0x05),
            ErrorKind::FinalSize => VarInt::from_u32(0x06),
            ErrorKind::FrameEncoding => VarInt::from_u32(0x07),
            ErrorKind::TransportParameter => VarInt::from_u32(0x08),
            ErrorKind::ConnectionIdLimit => VarInt::from_u32(0x09),
            ErrorKind::ProtocolViolation => VarInt::from_u32(0x0a),
            ErrorKind::InvalidToken => VarInt::from_u32(0x0b),
            ErrorKind::Application => VarInt::from_u32(0x0c),
            ErrorKind::CryptoBufferExceeded => VarInt::from_u32(0x0d),
            ErrorKind::KeyUpdate => VarInt::from_u32(0x0e),
            ErrorKind::AeadLimitReached => VarInt::from_u32(0x0f),
            ErrorKind::NoViablePath => VarInt::from_u32(0x10),
            ErrorKind::Crypto(code) => VarInt::from(0x100u16 | code as u16),
        }
    }
}

impl TryFrom<VarInt> for ErrorKind {
    type Error = InvalidErrorKind;

    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        Ok(match value.into_inner() {
            0x00 => ErrorKind::None,
            0x01 => ErrorKind::Internal,
            0x02 => ErrorKind::ConnectionRefused,
            0x03 => ErrorKind::FlowControl,
            0x04 => ErrorKind::StreamLimit,
            0x05 => ErrorKind::StreamState,
            0x06 => ErrorKind::FinalSize,
            0x07 => ErrorKind::FrameEncoding,
            0x08 => ErrorKind::TransportParameter,
            0x09 => ErrorKind::ConnectionIdLimit,
            0x0a => ErrorKind::ProtocolViolation,
            0x0b => ErrorKind::InvalidToken,
            0x0c => ErrorKind::Application,
            0x0d => ErrorKind::CryptoBufferExceeded,
            0x0e => ErrorKind::KeyUpdate,
            0x0f => ErrorKind::AeadLimitReached,
            0x10 => ErrorKind::NoViablePath,
            code @ 0x100..=0x1ff => ErrorKind::Crypto((code & 0xff) as u8),
            other => return Err(InvalidErrorKind(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid error kind from peer: {0}")]
pub struct InvalidErrorKind(u64);

/// A connection-closing error at the QUIC layer: which rule was broken,
/// the frame that broke it, and a human-readable reason.
///
/// This is the payload of a transport-layer CONNECTION_CLOSE (type 0x1c).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connection error of kind {kind} in {frame_type:?} frame: {reason}")]
pub struct QuicError {
    kind: ErrorKind,
    frame_type: FrameType,
    reason: Cow<'static, str>,
}

impl QuicError {
    pub fn new(
        kind: ErrorKind,
        frame_type: FrameType,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            kind,
            frame_type,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// An application-layer close: the payload of a CONNECTION_CLOSE of
/// type 0x1d, with an error code opaque to the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("application error {error_code}: {reason}")]
pub struct AppError {
    error_code: VarInt,
    reason: Cow<'static, str>,
}

impl AppError {
    pub fn new(error_code: VarInt, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            error_code,
            reason: reason.into(),
        }
    }

    pub fn error_code(&self) -> VarInt {
        self.error_code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Either layer's connection-terminating error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Quic(#[from] QuicError),
    #[error(transparent)]
    App(#[from] AppError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_roundtrip() {
        for kind in [
            ErrorKind::None,
            ErrorKind::FlowControl,
            ErrorKind::StreamLimit,
            ErrorKind::FinalSize,
            ErrorKind::ProtocolViolation,
            ErrorKind::NoViablePath,
            ErrorKind::Crypto(0x78),
        ] {
            let code = VarInt::from(kind);
            assert_eq!(ErrorKind::try_from(code).unwrap(), kind);
        }
        assert!(ErrorKind::try_from(VarInt::from_u32(0x11)).is_err());
    }

    #[test]
    fn test_quic_error_accessors() {
        let error = QuicError::new(
            ErrorKind::ProtocolViolation,
            FrameType::Ack(0),
            "ack frame largest pn is larger than the largest pn sent",
        );
        assert_eq!(error.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(error.frame_type(), FrameType::Ack(0));
        assert!(error.to_string().contains("largest pn"));
        assert_eq!(VarInt::from(error.kind()), VarInt::from_u32(0x0a));
    }
}
