use bytes::Bytes;
use qcore::{
    flow::SendFlow,
    frame::{ResetStreamFrame, StreamDataBlockedFrame, StreamFrame},
    sid::StreamId,
    varint::VarInt,
};
use tokio::time::{Duration, Instant};

use crate::send::SendBuf;

/// The sending half of a stream, per
/// [RFC 9000 Section 3.1](https://www.rfc-editor.org/rfc/rfc9000.html#section-3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Accepting writes; data may be buffered or partially sent.
    Ready,
    /// A fin is buffered and everything up to it was handed to packets.
    DataSent,
    /// The fin is acknowledged; the write side is fully closed.
    DataRecvd,
    /// A RESET_STREAM was queued; waiting for its acknowledgment.
    ResetSent,
    /// The reset is acknowledged.
    ResetRecvd,
}

/// What the scheduler got when it asked the stream for a frame.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamWriteOutcome {
    /// A frame to put in the packet, with its data.
    Frame(StreamFrame, Bytes),
    /// No permissible bytes: the stream flow control window is exhausted.
    Blocked(StreamDataBlockedFrame),
    /// Nothing to send right now.
    Idle,
}

/// The send machinery of one stream: buffered data, the fin bookkeeping,
/// stream-level send flow control and the optional time-to-live.
#[derive(Debug)]
pub struct SendingStream {
    stream_id: StreamId,
    sndbuf: SendBuf,
    state: SendState,
    /// The final size, set when a fin is buffered.
    fin_offset: Option<u64>,
    fin_sent: bool,
    /// The fin was sent and is neither acked nor declared lost.
    fin_outstanding: bool,
    fin_lost: bool,
    fin_acked: bool,
    flow: SendFlow,
    ttl_deadline: Option<Instant>,
    reset_frame: Option<ResetStreamFrame>,
}

/// Errors of the write side; all map to connection-fatal internal or
/// stream-state errors at the session layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("stream was already finished")]
    FinishedStream,
    #[error("stream was already reset")]
    ResetStream,
    #[error("acknowledged stream data that was never sent")]
    AckedUnsentData,
    #[error("stream time-to-live expired")]
    TtlExpired,
}

impl SendingStream {
    pub fn new(stream_id: StreamId, send_window: u64) -> Self {
        Self {
            stream_id,
            sndbuf: SendBuf::default(),
            state: SendState::Ready,
            fin_offset: None,
            fin_sent: false,
            fin_outstanding: false,
            fin_lost: false,
            fin_acked: false,
            flow: SendFlow::with_initial_offset(send_window),
            ttl_deadline: None,
            reset_frame: None,
        }
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Bytes buffered and not yet handed to packets.
    pub fn buffered(&self) -> u64 {
        self.sndbuf.unwritten()
    }

    pub fn is_write_side_closed(&self) -> bool {
        matches!(
            self.state,
            SendState::DataRecvd | SendState::ResetSent | SendState::ResetRecvd
        )
    }

    /// Arm a deadline after which any attempt to (re)transmit resets the
    /// stream instead.
    pub fn maybe_set_ttl(&mut self, ttl: Duration) {
        if self.ttl_deadline.is_none() {
            self.ttl_deadline = Some(Instant::now() + ttl);
        }
    }

    fn ttl_expired(&self) -> bool {
        self.ttl_deadline.is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Buffer application data, with no upper bound; flow control applies
    /// at packetization time, not here.
    pub fn write_or_buffer(&mut self, data: &[u8], fin: bool) -> Result<(), SendError> {
        match self.state {
            SendState::ResetSent | SendState::ResetRecvd => return Err(SendError::ResetStream),
            _ if self.fin_offset.is_some() => return Err(SendError::FinishedStream),
            _ => {}
        }
        self.sndbuf.save_stream_data(data);
        if fin {
            self.fin_offset = Some(self.sndbuf.stream_offset());
        }
        Ok(())
    }

    /// Ask for the next frame to send, limited by the stream window, the
    /// connection credit and the packet space available.
    ///
    /// Retransmissions go out first; they are exempt from flow control
    /// since the bytes were counted when first sent. Fresh data is clipped
    /// to `min(stream_window, connection_credit)`; if that is zero while
    /// data waits, a STREAM_DATA_BLOCKED frame is suggested instead.
    pub fn next_frame(
        &mut self,
        connection_credit: u64,
        max_frame_data: usize,
    ) -> Result<StreamWriteOutcome, SendError> {
        if self.is_write_side_closed() {
            return Ok(StreamWriteOutcome::Idle);
        }
        if self.ttl_expired() {
            return Err(SendError::TtlExpired);
        }

        // lost data first
        if let Some(pending) = self.sndbuf.next_pending_retransmission() {
            let length = ((pending.end - pending.start) as usize).min(max_frame_data);
            if length > 0 || self.fin_lost {
                return Ok(self.emit_frame(pending.start, length, false));
            }
        }
        if self.fin_lost && !self.sndbuf.has_pending_retransmission() {
            // a bare fin retransmission
            return Ok(self.emit_frame(self.sndbuf.stream_bytes_written(), 0, true));
        }

        // then fresh data
        let unsent = self.sndbuf.unwritten();
        let fin_pending = self.fin_offset.is_some() && !self.fin_sent;
        if unsent == 0 && !fin_pending {
            return Ok(StreamWriteOutcome::Idle);
        }
        let permitted = self.flow.available().min(connection_credit);
        if unsent > 0 && permitted == 0 {
            return Ok(match self.flow.should_send_blocked() {
                Some(offset) => StreamWriteOutcome::Blocked(StreamDataBlockedFrame::new(
                    self.stream_id,
                    VarInt::from_u64(offset).expect("flow offsets always fit in a varint"),
                )),
                None => StreamWriteOutcome::Idle,
            });
        }
        let offset = self.sndbuf.stream_bytes_written();
        let length = unsent.min(permitted).min(max_frame_data as u64) as usize;
        Ok(self.emit_frame(offset, length, false))
    }

    fn emit_frame(&mut self, offset: u64, length: usize, bare_fin: bool) -> StreamWriteOutcome {
        let mut data = bytes::BytesMut::with_capacity(length);
        if length > 0 {
            self.sndbuf
                .write_stream_data(offset, length, &mut data)
                .expect("buffered ranges are always present in the send buffer");
        }
        let mut frame = StreamFrame::new(self.stream_id, offset, length);
        let end = offset + length as u64;

        let fresh = end > self.sndbuf.stream_bytes_written();
        if fresh {
            let consumed = end - self.sndbuf.stream_bytes_written();
            self.sndbuf.on_data_consumed(consumed);
            self.flow.on_data_sent(consumed);
        } else if !bare_fin {
            self.sndbuf.on_data_retransmitted(offset, length as u64);
        }

        // set fin when this frame ends exactly at the buffered final size,
        // either for the first time or to replace a lost one
        let first_fin = !self.fin_sent;
        if self.fin_offset == Some(end) && (first_fin || bare_fin || fresh || self.fin_lost) {
            frame.set_fin(true);
            self.fin_sent = true;
            self.fin_outstanding = true;
            self.fin_lost = false;
            if self.sndbuf.unwritten() == 0 {
                self.state = SendState::DataSent;
            }
        }
        StreamWriteOutcome::Frame(frame, data.freeze())
    }

    /// An ack for `[offset, offset+length)` (+fin) arrived.
    pub fn on_data_acked(&mut self, offset: u64, length: u64, fin: bool) -> Result<(), SendError> {
        if matches!(self.state, SendState::ResetSent | SendState::ResetRecvd) {
            return Ok(());
        }
        if fin && !self.fin_sent {
            return Err(SendError::AckedUnsentData);
        }
        self.sndbuf
            .on_data_acked(offset, length)
            .map_err(|_| SendError::AckedUnsentData)?;
        if fin {
            self.fin_outstanding = false;
            self.fin_lost = false;
            self.fin_acked = true;
        }
        if self.state == SendState::DataSent
            && self.sndbuf.stream_bytes_outstanding() == 0
            && self.fin_acked
        {
            self.state = SendState::DataRecvd;
        }
        Ok(())
    }

    /// The frame carrying `[offset, offset+length)` (+fin) may be lost.
    pub fn on_data_lost(&mut self, offset: u64, length: u64, fin: bool) {
        if self.is_write_side_closed() {
            return;
        }
        self.sndbuf.on_data_lost(offset, length);
        if fin && self.fin_outstanding {
            self.fin_outstanding = false;
            self.fin_lost = true;
        }
    }

    /// Re-queue `[offset, offset+length)` minus what was acked meanwhile,
    /// bundling a lost fin when the range abuts the written end.
    pub fn retransmit_stream_data(&mut self, offset: u64, length: u64, fin: bool) {
        self.sndbuf.on_data_lost(offset, length);
        if fin && offset + length >= self.sndbuf.stream_bytes_written() && self.fin_sent {
            self.fin_lost = true;
            self.fin_outstanding = false;
        }
    }

    /// The peer raised our send window.
    pub fn update_send_window(&mut self, offset: u64) -> bool {
        self.flow.update_send_window_offset(offset)
    }

    /// Abruptly terminate the send side; returns the RESET_STREAM to queue.
    pub fn reset(&mut self, error_code: VarInt) -> Option<ResetStreamFrame> {
        if self.is_write_side_closed() {
            return None;
        }
        let frame = ResetStreamFrame::new(
            self.stream_id,
            error_code,
            VarInt::from_u64(self.sndbuf.stream_bytes_written())
                .expect("stream offsets always fit in a varint"),
        );
        self.state = SendState::ResetSent;
        self.reset_frame = Some(frame);
        Some(frame)
    }

    pub fn on_reset_acked(&mut self) {
        if self.state == SendState::ResetSent {
            self.state = SendState::ResetRecvd;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcore::sid::{Dir, Role};

    fn new_stream(window: u64) -> SendingStream {
        SendingStream::new(StreamId::new(Role::Client, Dir::Bi, 0), window)
    }

    fn expect_frame(outcome: StreamWriteOutcome) -> (StreamFrame, Bytes) {
        match outcome {
            StreamWriteOutcome::Frame(frame, data) => (frame, data),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn test_write_send_fin_ack() {
        let mut stream = new_stream(100);
        stream.write_or_buffer(b"hello", true).unwrap();

        let (frame, data) = expect_frame(stream.next_frame(1000, 1200).unwrap());
        assert_eq!(frame.range(), 0..5);
        assert!(frame.is_fin());
        assert_eq!(&data[..], b"hello");
        assert_eq!(stream.state(), SendState::DataSent);

        stream.on_data_acked(0, 5, true).unwrap();
        assert_eq!(stream.state(), SendState::DataRecvd);
        assert!(stream.is_write_side_closed());
    }

    #[test]
    fn test_window_clipping_and_blocked() {
        let mut stream = new_stream(3);
        stream.write_or_buffer(b"hello", false).unwrap();

        let (frame, data) = expect_frame(stream.next_frame(1000, 1200).unwrap());
        assert_eq!(frame.range(), 0..3);
        assert!(!frame.is_fin());
        assert_eq!(&data[..], b"hel");

        // the window is exhausted: exactly one BLOCKED at this offset
        match stream.next_frame(1000, 1200).unwrap() {
            StreamWriteOutcome::Blocked(blocked) => assert_eq!(blocked.limit(), 3),
            other => panic!("expected blocked, got {other:?}"),
        }
        assert_eq!(stream.next_frame(1000, 1200).unwrap(), StreamWriteOutcome::Idle);

        assert!(stream.update_send_window(100));
        let (frame, _) = expect_frame(stream.next_frame(1000, 1200).unwrap());
        assert_eq!(frame.range(), 3..5);
    }

    #[test]
    fn test_connection_credit_clips() {
        let mut stream = new_stream(100);
        stream.write_or_buffer(b"hello", false).unwrap();
        let (frame, _) = expect_frame(stream.next_frame(2, 1200).unwrap());
        assert_eq!(frame.range(), 0..2);
    }

    #[test]
    fn test_lost_data_is_retransmitted_first() {
        let mut stream = new_stream(100);
        stream.write_or_buffer(b"hello world", false).unwrap();
        let (frame, _) = expect_frame(stream.next_frame(1000, 1200).unwrap());
        assert_eq!(frame.range(), 0..11);

        stream.on_data_lost(0, 5, false);
        stream.write_or_buffer(b"!", false).unwrap();
        let (frame, data) = expect_frame(stream.next_frame(1000, 1200).unwrap());
        assert_eq!(frame.range(), 0..5);
        assert_eq!(&data[..], b"hello");

        // then fresh data resumes
        let (frame, _) = expect_frame(stream.next_frame(1000, 1200).unwrap());
        assert_eq!(frame.range(), 11..12);
    }

    #[test]
    fn test_lost_fin_retransmitted_bare() {
        let mut stream = new_stream(100);
        stream.write_or_buffer(b"hi", true).unwrap();
        let (frame, _) = expect_frame(stream.next_frame(1000, 1200).unwrap());
        assert!(frame.is_fin());

        stream.on_data_lost(0, 2, true);
        // data and fin both lost: one frame carries both again
        let (frame, data) = expect_frame(stream.next_frame(1000, 1200).unwrap());
        assert_eq!(frame.range(), 0..2);
        assert!(frame.is_fin());
        assert_eq!(&data[..], b"hi");

        // fin lost alone
        stream.on_data_lost(0, 0, true);
        let (frame, data) = expect_frame(stream.next_frame(1000, 1200).unwrap());
        assert_eq!(frame.range(), 2..2);
        assert!(frame.is_fin());
        assert!(data.is_empty());
    }

    #[test]
    fn test_fin_after_data_already_sent() {
        let mut stream = new_stream(100);
        stream.write_or_buffer(b"hi", false).unwrap();
        let (frame, _) = expect_frame(stream.next_frame(1000, 1200).unwrap());
        assert!(!frame.is_fin());

        // the fin arrives once everything is already on the wire
        stream.write_or_buffer(b"", true).unwrap();
        let (frame, data) = expect_frame(stream.next_frame(1000, 1200).unwrap());
        assert_eq!(frame.range(), 2..2);
        assert!(frame.is_fin());
        assert!(data.is_empty());
        assert_eq!(stream.state(), SendState::DataSent);
        assert_eq!(stream.next_frame(1000, 1200).unwrap(), StreamWriteOutcome::Idle);
    }

    #[test]
    fn test_ack_unsent_fin_is_error() {
        let mut stream = new_stream(100);
        stream.write_or_buffer(b"hi", false).unwrap();
        let _ = stream.next_frame(1000, 1200).unwrap();
        assert_eq!(
            stream.on_data_acked(0, 2, true).unwrap_err(),
            SendError::AckedUnsentData
        );
    }

    #[test]
    fn test_writes_after_fin_or_reset_refused() {
        let mut stream = new_stream(100);
        stream.write_or_buffer(b"hi", true).unwrap();
        assert_eq!(
            stream.write_or_buffer(b"!", false).unwrap_err(),
            SendError::FinishedStream
        );

        let mut stream = new_stream(100);
        stream.write_or_buffer(b"hi", false).unwrap();
        let frame = stream.reset(VarInt::from_u32(7)).unwrap();
        assert_eq!(frame.final_size(), 0);
        assert_eq!(stream.state(), SendState::ResetSent);
        assert_eq!(
            stream.write_or_buffer(b"!", false).unwrap_err(),
            SendError::ResetStream
        );
        stream.on_reset_acked();
        assert_eq!(stream.state(), SendState::ResetRecvd);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_blocks_transmission() {
        let mut stream = new_stream(100);
        stream.write_or_buffer(b"hello", false).unwrap();
        stream.maybe_set_ttl(Duration::from_millis(10));

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(
            stream.next_frame(1000, 1200).unwrap_err(),
            SendError::TtlExpired
        );
    }
}
