use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// PADDING frame.
///
/// ```text
/// PADDING Frame {
///     Type (i) = 0x00,
/// }
/// ```
///
/// See [RFC 9000 Section 19.1](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaddingFrame;

impl GetFrameType for PaddingFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::Padding
    }
}

impl EncodeFrame for PaddingFrame {}

impl<T: bytes::BufMut> WriteFrame<PaddingFrame> for T {
    fn put_frame(&mut self, _frame: &PaddingFrame) {
        self.put_u8(0x00);
    }
}
