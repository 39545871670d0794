use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// PING frame.
///
/// ```text
/// PING Frame {
///     Type (i) = 0x01,
/// }
/// ```
///
/// See [RFC 9000 Section 19.2](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingFrame;

impl GetFrameType for PingFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::Ping
    }
}

impl EncodeFrame for PingFrame {}

impl<T: bytes::BufMut> WriteFrame<PingFrame> for T {
    fn put_frame(&mut self, _frame: &PingFrame) {
        self.put_u8(0x01);
    }
}
