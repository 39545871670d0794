/// HTTP/3 error codes, per
/// [RFC 9114 Section 8.1](https://www.rfc-editor.org/rfc/rfc9114.html#section-8.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H3ErrorCode {
    NoError,
    GeneralProtocolError,
    InternalError,
    StreamCreationError,
    ClosedCriticalStream,
    FrameUnexpected,
    FrameError,
    ExcessiveLoad,
    IdError,
    SettingsError,
    MissingSettings,
    RequestRejected,
    RequestCancelled,
    RequestIncomplete,
    MessageError,
    ConnectError,
    VersionFallback,
}

impl H3ErrorCode {
    pub fn code(self) -> u64 {
        match self {
            H3ErrorCode::NoError => 0x100,
            H3ErrorCode::GeneralProtocolError => 0x101,
            H3ErrorCode::InternalError => 0x102,
            H3ErrorCode::StreamCreationError => 0x103,
            H3ErrorCode::ClosedCriticalStream => 0x104,
            H3ErrorCode::FrameUnexpected => 0x105,
            H3ErrorCode::FrameError => 0x106,
            H3ErrorCode::ExcessiveLoad => 0x107,
            H3ErrorCode::IdError => 0x108,
            H3ErrorCode::SettingsError => 0x109,
            H3ErrorCode::MissingSettings => 0x10a,
            H3ErrorCode::RequestRejected => 0x10b,
            H3ErrorCode::RequestCancelled => 0x10c,
            H3ErrorCode::RequestIncomplete => 0x10d,
            H3ErrorCode::MessageError => 0x10e,
            H3ErrorCode::ConnectError => 0x10f,
            H3ErrorCode::VersionFallback => 0x110,
        }
    }
}

/// A connection-fatal HTTP/3 error: the code to close with and why.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("http/3 error {code:?}: {reason}")]
pub struct H3Error {
    code: H3ErrorCode,
    reason: String,
}

impl H3Error {
    pub fn new(code: H3ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> H3ErrorCode {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}
