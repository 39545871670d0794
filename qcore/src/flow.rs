use std::time::{Duration, Instant};

use crate::{
    error::{ErrorKind, QuicError},
    frame::FrameType,
    sid::StreamId,
};

/// Send-side flow control: how far the peer allows us to write.
///
/// Used per stream and, with offsets summed over all streams, per
/// connection. The window only ever moves forward; a BLOCKED frame is
/// suggested at most once per stuck offset.
#[derive(Debug, Default, Clone)]
pub struct SendFlow {
    bytes_sent: u64,
    send_window_offset: u64,
    last_blocked_at: Option<u64>,
}

impl SendFlow {
    pub fn with_initial_offset(send_window_offset: u64) -> Self {
        Self {
            bytes_sent: 0,
            send_window_offset,
            last_blocked_at: None,
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn send_window_offset(&self) -> u64 {
        self.send_window_offset
    }

    /// How many bytes may still be sent; writes are clipped to this.
    pub fn available(&self) -> u64 {
        self.send_window_offset - self.bytes_sent
    }

    pub fn on_data_sent(&mut self, bytes: u64) {
        debug_assert!(bytes <= self.available());
        self.bytes_sent += bytes;
    }

    /// Raise the send window; offsets never regress. Returns whether the
    /// sender just became unblocked.
    pub fn update_send_window_offset(&mut self, new_offset: u64) -> bool {
        if new_offset <= self.send_window_offset {
            return false;
        }
        let was_blocked = self.available() == 0;
        self.send_window_offset = new_offset;
        was_blocked
    }

    /// The blocked offset to report, unless one was already reported for
    /// this exact offset.
    pub fn should_send_blocked(&mut self) -> Option<u64> {
        if self.available() > 0 {
            return None;
        }
        if self.last_blocked_at == Some(self.send_window_offset) {
            return None;
        }
        self.last_blocked_at = Some(self.send_window_offset);
        Some(self.send_window_offset)
    }
}

/// Receive-side flow control: how far we allow the peer to write.
///
/// The window advances as the application consumes bytes. When a full
/// window is consumed within two round trips the window size doubles, up
/// to the configured maximum.
#[derive(Debug, Clone)]
pub struct RecvFlow {
    bytes_consumed: u64,
    highest_received_offset: u64,
    receive_window_size: u64,
    max_receive_window_size: u64,
    receive_window_offset: u64,
    last_window_update: Option<Instant>,
}

impl RecvFlow {
    pub fn new(receive_window_size: u64, max_receive_window_size: u64) -> Self {
        debug_assert!(receive_window_size <= max_receive_window_size);
        Self {
            bytes_consumed: 0,
            highest_received_offset: 0,
            receive_window_size,
            max_receive_window_size,
            receive_window_offset: receive_window_size,
            last_window_update: None,
        }
    }

    pub fn highest_received_offset(&self) -> u64 {
        self.highest_received_offset
    }

    pub fn receive_window_offset(&self) -> u64 {
        self.receive_window_offset
    }

    /// Record that data up to `offset` has been received. Exceeding the
    /// advertised window is a peer protocol violation.
    pub fn on_new_rcvd_offset(&mut self, stream_id: Option<StreamId>, offset: u64) -> Result<u64, QuicError> {
        if offset > self.receive_window_offset {
            return Err(QuicError::new(
                ErrorKind::FlowControl,
                FrameType::Stream(0),
                match stream_id {
                    Some(stream_id) => format!("{stream_id} exceeded its flow control limit"),
                    None => "connection flow control limit exceeded".to_string(),
                },
            ));
        }
        let newly = offset.saturating_sub(self.highest_received_offset);
        self.highest_received_offset = self.highest_received_offset.max(offset);
        Ok(newly)
    }

    /// Record bytes handed to the application and, when more than half the
    /// window has been consumed, return the new window offset to advertise.
    pub fn on_bytes_consumed(
        &mut self,
        bytes: u64,
        srtt: Duration,
        now: Instant,
    ) -> Option<u64> {
        self.bytes_consumed += bytes;
        debug_assert!(self.bytes_consumed <= self.highest_received_offset);

        let threshold = self.receive_window_size / 2;
        if self.receive_window_offset - self.bytes_consumed >= threshold {
            return None;
        }

        // A window drained faster than two round trips is too small.
        if self
            .last_window_update
            .is_some_and(|last| now.duration_since(last) < srtt * 2)
            && self.receive_window_size < self.max_receive_window_size
        {
            self.receive_window_size =
                (self.receive_window_size * 2).min(self.max_receive_window_size);
            tracing::debug!(
                window_size = self.receive_window_size,
                "auto-tuned receive window"
            );
        }
        self.last_window_update = Some(now);
        self.receive_window_offset = self.bytes_consumed + self.receive_window_size;
        Some(self.receive_window_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_clipping_and_blocked() {
        let mut flow = SendFlow::with_initial_offset(100);
        assert_eq!(flow.available(), 100);
        flow.on_data_sent(100);
        assert_eq!(flow.available(), 0);

        // the first query reports blocked, the duplicate is suppressed
        assert_eq!(flow.should_send_blocked(), Some(100));
        assert_eq!(flow.should_send_blocked(), None);

        assert!(flow.update_send_window_offset(150));
        assert_eq!(flow.available(), 50);
        // a regressed or equal offset is ignored
        assert!(!flow.update_send_window_offset(150));
        assert!(!flow.update_send_window_offset(120));
        assert_eq!(flow.send_window_offset(), 150);
    }

    #[test]
    fn test_recv_violation() {
        let mut flow = RecvFlow::new(100, 1000);
        assert_eq!(flow.on_new_rcvd_offset(None, 100).unwrap(), 100);
        let error = flow.on_new_rcvd_offset(None, 101).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::FlowControl);
    }

    #[test]
    fn test_recv_window_advances_past_threshold() {
        let mut flow = RecvFlow::new(100, 1000);
        let now = Instant::now();
        let srtt = Duration::from_millis(100);

        flow.on_new_rcvd_offset(None, 40).unwrap();
        assert_eq!(flow.on_bytes_consumed(40, srtt, now), None);

        flow.on_new_rcvd_offset(None, 60).unwrap();
        // consumed 60, remaining window 40 < 50: advertise a new offset
        let update = flow.on_bytes_consumed(20, srtt, now).unwrap();
        assert_eq!(update, 160);
    }

    #[test]
    fn test_recv_window_auto_tuning() {
        let mut flow = RecvFlow::new(100, 1000);
        let srtt = Duration::from_millis(100);
        let start = Instant::now();

        flow.on_new_rcvd_offset(None, 60).unwrap();
        let update = flow.on_bytes_consumed(60, srtt, start).unwrap();
        assert_eq!(update, 160);

        // the next full window is consumed within 2*srtt: window doubles
        flow.on_new_rcvd_offset(None, 130).unwrap();
        let update = flow
            .on_bytes_consumed(70, srtt, start + Duration::from_millis(150))
            .unwrap();
        assert_eq!(update, 130 + 200);

        // a slow consumer does not grow the window further
        flow.on_new_rcvd_offset(None, 300).unwrap();
        let update = flow
            .on_bytes_consumed(170, srtt, start + Duration::from_secs(10))
            .unwrap();
        assert_eq!(update, 300 + 200);
    }
}
