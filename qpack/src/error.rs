/// QPACK's three connection-fatal error codes, per
/// [RFC 9204 Section 6](https://www.rfc-editor.org/rfc/rfc9204.html#section-6).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QpackError {
    /// The decoder failed to interpret a field section.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
    /// The decoder failed to interpret an encoder-stream instruction.
    #[error("encoder stream error: {0}")]
    EncoderStreamError(String),
    /// The encoder failed to interpret a decoder-stream instruction.
    #[error("decoder stream error: {0}")]
    DecoderStreamError(String),
}

impl QpackError {
    /// The wire error code of a CONNECTION_CLOSE caused by this error.
    pub fn code(&self) -> u64 {
        match self {
            QpackError::DecompressionFailed(_) => 0x200,
            QpackError::EncoderStreamError(_) => 0x201,
            QpackError::DecoderStreamError(_) => 0x202,
        }
    }
}
