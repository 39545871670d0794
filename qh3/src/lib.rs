//! HTTP/3 framing over QUIC (RFC 9114): the frame registry, an
//! incremental frame decoder, the frame encoder, SETTINGS handling and
//! the GOAWAY / MAX_PUSH_ID session control rules.

/// GOAWAY and MAX_PUSH_ID bookkeeping.
pub mod control;
/// The incremental frame decoder.
pub mod decoder;
/// The frame encoder.
pub mod encoder;
mod error;
/// Frame types and their classification.
pub mod frame;
/// The SETTINGS frame payload.
pub mod settings;

pub use error::{H3Error, H3ErrorCode};

/// Unidirectional stream type labels, sent as the first varint of every
/// unidirectional stream. See
/// [RFC 9114 Section 6.2](https://www.rfc-editor.org/rfc/rfc9114.html#section-6.2)
/// and [RFC 9204 Section 4.2](https://www.rfc-editor.org/rfc/rfc9204.html#section-4.2).
pub mod stream_type {
    pub const CONTROL: u64 = 0x00;
    pub const PUSH: u64 = 0x01;
    pub const QPACK_ENCODER: u64 = 0x02;
    pub const QPACK_DECODER: u64 = 0x03;
}
