use super::FrameType;
use crate::{
    epoch::Epoch,
    error::{ErrorKind, QuicError},
    varint::VarInt,
};

/// Errors from parsing a packet payload into frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("A frame of unknown type: {0}")]
    InvalidType(VarInt),
    #[error("{0}")]
    IncompleteType(String),
    #[error("The {0:?} frame is not allowed in epoch {1}")]
    WrongType(FrameType, Epoch),
    #[error("Incomplete {0:?} frame: {1}")]
    IncompleteFrame(FrameType, String),
    #[error("Invalid {0:?} frame: {1}")]
    InvalidFrame(FrameType, String),
}

impl From<Error> for QuicError {
    fn from(e: Error) -> Self {
        let frame_type = match &e {
            Error::InvalidType(..) | Error::IncompleteType(..) => FrameType::Padding,
            Error::WrongType(frame_type, ..)
            | Error::IncompleteFrame(frame_type, ..)
            | Error::InvalidFrame(frame_type, ..) => *frame_type,
        };
        let kind = match &e {
            Error::WrongType(..) => ErrorKind::ProtocolViolation,
            _ => ErrorKind::FrameEncoding,
        };
        QuicError::new(kind, frame_type, e.to_string())
    }
}

impl<I> nom::error::ParseError<I> for Error {
    fn from_error_kind(_input: I, kind: nom::error::ErrorKind) -> Self {
        Self::IncompleteType(format!("parse error: {}", kind.description()))
    }

    fn append(_input: I, _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}
