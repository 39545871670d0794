use std::time::Duration;

use bytes::{BufMut, Bytes};
use qcore::{
    error::{ErrorKind, QuicError},
    frame::{
        FrameType, MaxStreamDataFrame, ResetStreamFrame, StopSendingFrame, StreamFrame,
    },
    sid::StreamId,
    varint::VarInt,
};

use super::{
    RecvingStream, SendError, SendingStream, StreamWriteOutcome,
};
use crate::recv::SequencerEvent;

/// What halves a stream has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Bidirectional,
    /// Locally writable only; incoming data is a peer error.
    WriteOnly,
    /// Locally readable only; local writes are a caller error.
    ReadOnly,
    /// The handshake byte stream: bidirectional, no flow control limits.
    Crypto,
}

/// Errors a stream reports to its caller or converts into connection
/// closes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("tried to write data on a receive-only stream")]
    WriteOnReceiveOnly,
    #[error("received data on a send-only stream")]
    DataOnSendOnly,
    #[error(transparent)]
    Send(#[from] SendError),
}

impl StreamError {
    pub fn into_quic_error(self, stream_id: StreamId) -> QuicError {
        let kind = match &self {
            StreamError::DataOnSendOnly => ErrorKind::StreamState,
            StreamError::WriteOnReceiveOnly | StreamError::Send(_) => ErrorKind::Internal,
        };
        QuicError::new(kind, FrameType::Stream(0), format!("{stream_id}: {self}"))
    }
}

/// One stream: up to two half-closed state machines and the priority the
/// write scheduler sorts by.
#[derive(Debug)]
pub struct Stream {
    stream_id: StreamId,
    stream_type: StreamType,
    priority: u8,
    sender: Option<SendingStream>,
    recver: Option<RecvingStream>,
}

impl Stream {
    pub fn new(
        stream_id: StreamId,
        stream_type: StreamType,
        send_window: u64,
        receive_window: u64,
        max_receive_window: u64,
    ) -> Self {
        let sender = match stream_type {
            StreamType::ReadOnly => None,
            StreamType::Crypto => Some(SendingStream::new(stream_id, u64::MAX)),
            _ => Some(SendingStream::new(stream_id, send_window)),
        };
        let recver = match stream_type {
            StreamType::WriteOnly => None,
            _ => Some(RecvingStream::new(
                stream_id,
                receive_window,
                max_receive_window,
            )),
        };
        Self {
            stream_id,
            stream_type,
            priority: 0,
            sender,
            recver,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    /// Buffer data (and possibly the fin) for sending.
    pub fn write_or_buffer(&mut self, data: &[u8], fin: bool) -> Result<(), StreamError> {
        let sender = self
            .sender
            .as_mut()
            .ok_or(StreamError::WriteOnReceiveOnly)?;
        Ok(sender.write_or_buffer(data, fin)?)
    }

    /// Ask the write side for its next frame; see
    /// [`SendingStream::next_frame`].
    pub fn next_frame(
        &mut self,
        connection_credit: u64,
        max_frame_data: usize,
    ) -> Result<StreamWriteOutcome, StreamError> {
        match self.sender.as_mut() {
            Some(sender) => Ok(sender.next_frame(connection_credit, max_frame_data)?),
            None => Ok(StreamWriteOutcome::Idle),
        }
    }

    /// Incoming STREAM frame; a send-only stream refuses it.
    pub fn on_stream_frame(
        &mut self,
        frame: &StreamFrame,
        data: Bytes,
    ) -> Result<SequencerEvent, QuicError> {
        match self.recver.as_mut() {
            Some(recver) => recver.on_stream_frame(frame, data),
            None => Err(StreamError::DataOnSendOnly.into_quic_error(self.stream_id)),
        }
    }

    /// Incoming RESET_STREAM: only the read side closes.
    pub fn on_reset_stream(&mut self, frame: &ResetStreamFrame) -> Result<(), QuicError> {
        match self.recver.as_mut() {
            Some(recver) => recver.on_reset_stream(frame),
            None => Err(StreamError::DataOnSendOnly.into_quic_error(self.stream_id)),
        }
    }

    /// Incoming STOP_SENDING: reset our write side with the peer's code.
    pub fn on_stop_sending(&mut self, frame: &StopSendingFrame) -> Option<ResetStreamFrame> {
        self.sender.as_mut()?.reset(frame.app_error_code())
    }

    pub fn on_max_stream_data(&mut self, frame: &MaxStreamDataFrame) -> bool {
        self.sender
            .as_mut()
            .is_some_and(|sender| sender.update_send_window(frame.max_stream_data()))
    }

    /// Stream bytes `[offset, offset+length)` (+fin) were acknowledged.
    pub fn on_data_acked(
        &mut self,
        offset: u64,
        length: u64,
        fin: bool,
    ) -> Result<(), StreamError> {
        match self.sender.as_mut() {
            Some(sender) => Ok(sender.on_data_acked(offset, length, fin)?),
            None => Err(StreamError::WriteOnReceiveOnly),
        }
    }

    /// Stream bytes `[offset, offset+length)` (+fin) may be lost.
    pub fn on_data_lost(&mut self, offset: u64, length: u64, fin: bool) {
        if let Some(sender) = self.sender.as_mut() {
            sender.on_data_lost(offset, length, fin);
        }
    }

    /// Explicit retransmission request; see
    /// [`SendingStream::retransmit_stream_data`].
    pub fn retransmit_stream_data(&mut self, offset: u64, length: u64, fin: bool) {
        if let Some(sender) = self.sender.as_mut() {
            sender.retransmit_stream_data(offset, length, fin);
        }
    }

    /// Read reassembled data; may produce a MAX_STREAM_DATA to send.
    pub fn read(
        &mut self,
        dst: &mut impl BufMut,
        srtt: Duration,
    ) -> (usize, Option<MaxStreamDataFrame>) {
        match self.recver.as_mut() {
            Some(recver) => recver.read(dst, srtt),
            None => (0, None),
        }
    }

    pub fn is_readable(&self) -> bool {
        self.recver.as_ref().is_some_and(RecvingStream::is_readable)
    }

    /// Locally reset the write side.
    pub fn reset(&mut self, error_code: VarInt) -> Option<ResetStreamFrame> {
        self.sender.as_mut()?.reset(error_code)
    }

    /// Stop reading; may produce a STOP_SENDING to send.
    pub fn stop_reading(&mut self, error_code: VarInt) -> Option<StopSendingFrame> {
        self.recver.as_mut()?.stop_reading(error_code)
    }

    /// Arm the time-to-live deadline of the write side.
    pub fn maybe_set_ttl(&mut self, ttl: Duration) {
        if let Some(sender) = self.sender.as_mut() {
            sender.maybe_set_ttl(ttl);
        }
    }

    /// A stream is destroyed once both halves are closed and nothing it
    /// sent is still waiting for acknowledgment.
    pub fn is_terminated(&self) -> bool {
        let write_done = self
            .sender
            .as_ref()
            .map_or(true, SendingStream::is_write_side_closed);
        let read_done = self
            .recver
            .as_ref()
            .map_or(true, RecvingStream::is_terminated);
        write_done && read_done
    }
}
