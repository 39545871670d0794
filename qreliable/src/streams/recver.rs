use std::time::Duration;

use bytes::{BufMut, Bytes};
use qcore::{
    error::{ErrorKind, QuicError},
    flow::RecvFlow,
    frame::{MaxStreamDataFrame, ResetStreamFrame, StopSendingFrame, StreamFrame},
    sid::StreamId,
    varint::VarInt,
};

use crate::recv::{Delivery, Sequencer, SequencerEvent};

/// The receiving half of a stream: reassembly, receive flow control and
/// the RESET_STREAM / STOP_SENDING bookkeeping.
#[derive(Debug)]
pub struct RecvingStream {
    stream_id: StreamId,
    sequencer: Sequencer,
    flow: RecvFlow,
    read_side_closed: bool,
    rst_received: Option<VarInt>,
    stop_sending_sent: bool,
}

impl RecvingStream {
    pub fn new(stream_id: StreamId, receive_window: u64, max_receive_window: u64) -> Self {
        Self {
            stream_id,
            sequencer: Sequencer::new(stream_id, Delivery::EdgeTriggered),
            flow: RecvFlow::new(receive_window, max_receive_window),
            read_side_closed: false,
            rst_received: None,
            stop_sending_sent: false,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn is_read_side_closed(&self) -> bool {
        self.read_side_closed
    }

    /// The reset the peer sent, if any.
    pub fn reset_error_code(&self) -> Option<VarInt> {
        self.rst_received
    }

    /// Feed one STREAM frame through flow control and the sequencer.
    /// The returned event's `window_consumed` also counts against the
    /// connection-level flow controller.
    pub fn on_stream_frame(
        &mut self,
        frame: &StreamFrame,
        data: Bytes,
    ) -> Result<SequencerEvent, QuicError> {
        debug_assert_eq!(frame.stream_id(), self.stream_id);
        // flow control first: even dropped data consumed window
        self.flow
            .on_new_rcvd_offset(Some(self.stream_id), frame.range().end)?;
        if self.read_side_closed {
            return Ok(SequencerEvent::default());
        }
        self.sequencer
            .on_data_frame(frame.offset(), data, frame.is_fin())
    }

    /// Handle the peer's RESET_STREAM; closes the read side.
    pub fn on_reset_stream(&mut self, frame: &ResetStreamFrame) -> Result<(), QuicError> {
        debug_assert_eq!(frame.stream_id(), self.stream_id);
        let final_size = frame.final_size();
        if final_size < self.sequencer.highest_offset() {
            return Err(QuicError::new(
                ErrorKind::FinalSize,
                qcore::frame::FrameType::ResetStream,
                format!("{} reset below the data already received", self.stream_id),
            ));
        }
        if let Some(close) = self.sequencer.close_offset() {
            if close != final_size {
                return Err(QuicError::new(
                    ErrorKind::FinalSize,
                    qcore::frame::FrameType::ResetStream,
                    format!("{} reset with a different final size", self.stream_id),
                ));
            }
        }
        // the whole final size counts against flow control exactly once
        self.flow.on_new_rcvd_offset(Some(self.stream_id), final_size)?;
        self.rst_received = Some(frame.app_error_code());
        self.read_side_closed = true;
        Ok(())
    }

    /// Read reassembled data; consuming bytes may advance the receive
    /// window, in which case the MAX_STREAM_DATA to send is returned.
    pub fn read(
        &mut self,
        dst: &mut impl BufMut,
        srtt: Duration,
    ) -> (usize, Option<MaxStreamDataFrame>) {
        if self.read_side_closed {
            return (0, None);
        }
        let read = self.sequencer.read(dst);
        if self.sequencer.is_fin_read() {
            self.read_side_closed = true;
        }
        let update = self
            .flow
            .on_bytes_consumed(read as u64, srtt, std::time::Instant::now())
            .map(|offset| {
                MaxStreamDataFrame::new(
                    self.stream_id,
                    VarInt::from_u64(offset).expect("flow offsets always fit in a varint"),
                )
            });
        (read, update)
    }

    pub fn is_readable(&self) -> bool {
        !self.read_side_closed && self.sequencer.is_readable()
    }

    /// Whether the fin (or a reset) has fully terminated this half.
    pub fn is_terminated(&self) -> bool {
        self.read_side_closed
    }

    /// Abandon reading. Data already or later received is discarded; the
    /// STOP_SENDING frame to queue is returned the first time.
    pub fn stop_reading(&mut self, error_code: VarInt) -> Option<StopSendingFrame> {
        self.sequencer.stop_reading();
        if self.stop_sending_sent || self.read_side_closed {
            return None;
        }
        self.stop_sending_sent = true;
        Some(StopSendingFrame::new(self.stream_id, error_code))
    }
}
