use bytes::{BufMut, Bytes};
use qcore::{
    error::{ErrorKind, QuicError},
    frame::FrameType,
    sid::StreamId,
    varint::VARINT_MAX,
};

use super::RecvBuf;

/// When the reader is told about newly readable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Notify only when the readable prefix grows from empty.
    #[default]
    EdgeTriggered,
    /// Notify on every frame that leaves the stream readable.
    LevelTriggered,
}

/// What one incoming stream frame changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerEvent {
    /// How far the largest received offset advanced; the amount of
    /// receive window the frame consumed.
    pub window_consumed: u64,
    /// The reader should be woken to read data.
    pub notify_readable: bool,
    /// All data up to the final size was received and discarded while not
    /// reading; only the end-of-stream remains to surface.
    pub fin_without_data: bool,
}

/// Reassembles one stream's frames into the byte sequence the application
/// reads, and polices the final size the FIN committed to.
#[derive(Debug, Default)]
pub struct Sequencer {
    stream_id: StreamId,
    rcvbuf: RecvBuf,
    /// The offset one past the last byte, fixed by the first FIN.
    close_offset: Option<u64>,
    delivery: Delivery,
    /// Discard data instead of buffering it; the fin still surfaces.
    ignore_read_data: bool,
    fin_read: bool,
}

impl Sequencer {
    pub fn new(stream_id: StreamId, delivery: Delivery) -> Self {
        Self {
            stream_id,
            delivery,
            ..Default::default()
        }
    }

    pub fn close_offset(&self) -> Option<u64> {
        self.close_offset
    }

    pub fn highest_offset(&self) -> u64 {
        self.rcvbuf.largest_offset()
    }

    /// Process one stream frame. Validates the final-size rules before any
    /// buffering happens.
    pub fn on_data_frame(
        &mut self,
        offset: u64,
        data: Bytes,
        fin: bool,
    ) -> Result<SequencerEvent, QuicError> {
        let end = offset + data.len() as u64;
        if end > VARINT_MAX {
            return Err(self.protocol_error(
                ErrorKind::FrameEncoding,
                "stream frame exceeds the maximum stream offset",
            ));
        }
        if fin {
            match self.close_offset {
                Some(close) if close != end => {
                    return Err(self.protocol_error(
                        ErrorKind::FinalSize,
                        "stream received a second FIN at a different offset",
                    ));
                }
                _ => self.close_offset = Some(end),
            }
        }
        if let Some(close) = self.close_offset {
            if end > close {
                return Err(self.protocol_error(
                    ErrorKind::FinalSize,
                    "stream received data beyond its close offset",
                ));
            }
        }
        if data.is_empty() && !fin {
            return Ok(SequencerEvent::default());
        }

        let was_readable = self.rcvbuf.is_readable();
        let window_consumed = self.rcvbuf.recv(offset, data);
        if self.ignore_read_data {
            self.rcvbuf.discard();
            return Ok(SequencerEvent {
                window_consumed,
                notify_readable: false,
                fin_without_data: self.all_data_received() && !self.fin_read,
            });
        }

        let notify_readable = match self.delivery {
            Delivery::EdgeTriggered => !was_readable && self.rcvbuf.is_readable(),
            Delivery::LevelTriggered => self.rcvbuf.is_readable(),
        } || (fin && self.all_data_received());
        Ok(SequencerEvent {
            window_consumed,
            notify_readable,
            fin_without_data: false,
        })
    }

    /// Read continuous data into `dst`; returns the bytes read. Reaching
    /// the close offset consumes the fin.
    pub fn read(&mut self, dst: &mut impl BufMut) -> usize {
        let read = self.rcvbuf.try_read(dst);
        if self.close_offset == Some(self.rcvbuf.nread()) {
            self.fin_read = true;
        }
        read
    }

    pub fn is_readable(&self) -> bool {
        !self.ignore_read_data && self.rcvbuf.is_readable()
    }

    /// Every byte up to the final size has arrived.
    pub fn all_data_received(&self) -> bool {
        self.close_offset
            .is_some_and(|close| self.rcvbuf.nread() + self.rcvbuf.available() == close)
    }

    /// The fin was consumed by the reader (or surfaced while discarding).
    pub fn is_fin_read(&self) -> bool {
        self.fin_read
    }

    /// Stop buffering: already-buffered and future data is discarded, only
    /// the end-of-stream signal remains interesting.
    pub fn stop_reading(&mut self) {
        self.ignore_read_data = true;
        self.rcvbuf.discard();
        if self.all_data_received() {
            self.fin_read = true;
        }
    }

    fn protocol_error(&self, kind: ErrorKind, reason: &str) -> QuicError {
        QuicError::new(
            kind,
            FrameType::Stream(0),
            format!("{}: {reason}", self.stream_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use qcore::sid::{Dir, Role};

    use super::*;

    fn sequencer(delivery: Delivery) -> Sequencer {
        Sequencer::new(StreamId::new(Role::Server, Dir::Bi, 0), delivery)
    }

    #[test]
    fn test_in_order_delivery_edge_triggered() {
        let mut seq = sequencer(Delivery::EdgeTriggered);
        let event = seq.on_data_frame(0, Bytes::from("hello"), false).unwrap();
        assert_eq!(event.window_consumed, 5);
        assert!(event.notify_readable);

        // growing an already-readable prefix stays silent in edge mode
        let event = seq.on_data_frame(5, Bytes::from("world"), false).unwrap();
        assert!(!event.notify_readable);

        let mut dst = bytes::BytesMut::new();
        assert_eq!(seq.read(&mut dst), 10);
        assert_eq!(dst.as_ref(), b"helloworld");
    }

    #[test]
    fn test_level_triggered_notifies_repeatedly() {
        let mut seq = sequencer(Delivery::LevelTriggered);
        assert!(
            seq.on_data_frame(0, Bytes::from("a"), false)
                .unwrap()
                .notify_readable
        );
        assert!(
            seq.on_data_frame(1, Bytes::from("b"), false)
                .unwrap()
                .notify_readable
        );
    }

    #[test]
    fn test_fin_fixes_final_size() {
        let mut seq = sequencer(Delivery::EdgeTriggered);
        seq.on_data_frame(0, Bytes::from("hello"), true).unwrap();
        assert_eq!(seq.close_offset(), Some(5));

        // a second fin at the same offset is fine
        seq.on_data_frame(5, Bytes::new(), true).unwrap();
        // at a different offset it is fatal
        let error = seq.on_data_frame(4, Bytes::new(), true).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::FinalSize);
    }

    #[test]
    fn test_data_beyond_close_offset() {
        let mut seq = sequencer(Delivery::EdgeTriggered);
        seq.on_data_frame(0, Bytes::from("hello"), true).unwrap();
        let error = seq
            .on_data_frame(5, Bytes::from("!"), false)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::FinalSize);
    }

    #[test]
    fn test_empty_frame_is_noop_but_fin_counts() {
        let mut seq = sequencer(Delivery::EdgeTriggered);
        let event = seq.on_data_frame(0, Bytes::new(), false).unwrap();
        assert_eq!(event, SequencerEvent::default());

        let event = seq.on_data_frame(0, Bytes::new(), true).unwrap();
        assert_eq!(seq.close_offset(), Some(0));
        assert!(event.notify_readable);
        let mut dst = bytes::BytesMut::new();
        seq.read(&mut dst);
        assert!(seq.is_fin_read());
    }

    #[test]
    fn test_fin_read_after_draining() {
        let mut seq = sequencer(Delivery::EdgeTriggered);
        seq.on_data_frame(0, Bytes::from("hi"), true).unwrap();
        let mut dst = bytes::BytesMut::new();
        assert_eq!(seq.read(&mut dst), 2);
        assert!(seq.is_fin_read());
    }

    #[test]
    fn test_stop_reading_discards_but_surfaces_fin() {
        let mut seq = sequencer(Delivery::EdgeTriggered);
        seq.on_data_frame(0, Bytes::from("hello"), false).unwrap();
        seq.stop_reading();
        assert!(!seq.is_readable());

        let event = seq.on_data_frame(5, Bytes::from("world"), true).unwrap();
        assert!(!event.notify_readable);
        assert!(event.fin_without_data);
        assert_eq!(event.window_consumed, 5);
    }

    #[test]
    fn test_out_of_order_then_fin() {
        let mut seq = sequencer(Delivery::EdgeTriggered);
        let event = seq.on_data_frame(5, Bytes::from("world"), true).unwrap();
        assert!(!event.notify_readable);
        assert!(!seq.all_data_received());

        let event = seq.on_data_frame(0, Bytes::from("hello"), false).unwrap();
        assert!(event.notify_readable);
        assert!(seq.all_data_received());
    }
}
