use std::{
    collections::VecDeque,
    ops::DerefMut,
    sync::{Arc, Mutex, MutexGuard},
};

use derive_more::{Deref, DerefMut};
use qcore::{
    error::{ErrorKind, QuicError},
    frame::{AckFrame, GetFrameType},
    util::IndexDeque,
    varint::VARINT_MAX,
};
use tokio::time::Instant;

/// The state of one sent packet number.
///
/// Transitions are monotone: once a packet leaves `Flighting` it never
/// returns. `Skipped` entries exist only to fill the gaps of deliberately
/// unused packet numbers, and acknowledging one is a peer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SentPktState {
    /// The number was skipped on purpose; nothing was sent with it.
    Skipped,
    /// Sent and outstanding: may still be acked, declared lost or neutered.
    Flighting {
        nframes: usize,
        sent_time: Instant,
        bytes: u32,
        in_flight: bool,
        has_crypto: bool,
    },
    /// Declared lost; its frames were fed back for retransmission. The
    /// entry stays to recognize a late (spurious-loss) acknowledgment.
    Lost {
        nframes: usize,
        sent_time: Instant,
        bytes: u32,
    },
    /// Acknowledged by the peer.
    Acked { nframes: usize },
    /// Made unackable by a key advance; an ack of it is a peer error.
    Neutered { nframes: usize },
}

impl Default for SentPktState {
    fn default() -> Self {
        Self::Skipped
    }
}

impl SentPktState {
    fn new_flighting(
        nframes: usize,
        sent_time: Instant,
        bytes: u32,
        in_flight: bool,
        has_crypto: bool,
    ) -> Self {
        Self::Flighting {
            nframes,
            sent_time,
            bytes,
            in_flight,
            has_crypto,
        }
    }

    fn nframes(&self) -> usize {
        match *self {
            SentPktState::Skipped => 0,
            SentPktState::Flighting { nframes, .. } => nframes,
            SentPktState::Lost { nframes, .. } => nframes,
            SentPktState::Acked { nframes } => nframes,
            SentPktState::Neutered { nframes } => nframes,
        }
    }
}

/// Everything the recovery machinery needs to know about a freshly acked
/// packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketAck {
    pub pn: u64,
    pub sent_time: Instant,
    pub bytes: u32,
    /// Whether the packet was counted against the congestion window when
    /// the ack arrived.
    pub was_in_flight: bool,
    pub has_crypto: bool,
    /// The packet had already been declared lost; the loss was spurious.
    pub spurious_loss: bool,
}

/// Everything the recovery machinery needs to know about a packet that was
/// just declared lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLoss {
    pub pn: u64,
    pub sent_time: Instant,
    pub bytes: u32,
    pub was_in_flight: bool,
}

/// Error results of acknowledging a packet that must not be acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AckError {
    #[error("acknowledged a packet number that was never sent")]
    UnsentPacketsAcked,
    #[error("acknowledged a packet that was neutered by a key advance")]
    UnackablePacketsAcked,
}

impl AckError {
    pub fn into_quic_error(self, frame_type: qcore::frame::FrameType) -> QuicError {
        QuicError::new(ErrorKind::ProtocolViolation, frame_type, self.to_string())
    }
}

/// 记录发送的数据包及其中的帧。queue记录着所有发送过的帧，
/// sent_packets记录着顺序发送的数据包包含几个帧，以及这些数据包的状态。
#[derive(Debug, Default, Deref, DerefMut)]
struct SentJournal<T> {
    #[deref]
    #[deref_mut]
    queue: VecDeque<T>,
    sent_packets: IndexDeque<SentPktState, VARINT_MAX>,
    largest_acked_pktno: Option<u64>,
    bytes_in_flight: u64,
    pending_crypto_count: usize,
}

impl<T> SentJournal<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity * 4),
            sent_packets: IndexDeque::with_capacity(capacity),
            largest_acked_pktno: None,
            bytes_in_flight: 0,
            pending_crypto_count: 0,
        }
    }

    fn frame_offset(&self, pn: u64) -> usize {
        self.sent_packets
            .enumerate()
            .take_while(|(pkt_idx, _)| *pkt_idx < pn)
            .map(|(_, s)| s.nframes())
            .sum()
    }

    fn on_packet_acked(&mut self, pn: u64) -> Result<(PacketAck, usize), AckError> {
        let Some(state) = self.sent_packets.get_mut(pn) else {
            // below the journal front: an obsolete packet acked again, a no-op
            if pn < self.sent_packets.offset() {
                return Ok((
                    PacketAck {
                        pn,
                        sent_time: Instant::now(),
                        bytes: 0,
                        was_in_flight: false,
                        has_crypto: false,
                        spurious_loss: false,
                    },
                    0,
                ));
            }
            return Err(AckError::UnsentPacketsAcked);
        };
        match *state {
            SentPktState::Skipped => Err(AckError::UnsentPacketsAcked),
            SentPktState::Neutered { .. } => Err(AckError::UnackablePacketsAcked),
            SentPktState::Acked { .. } => Ok((
                PacketAck {
                    pn,
                    sent_time: Instant::now(),
                    bytes: 0,
                    was_in_flight: false,
                    has_crypto: false,
                    spurious_loss: false,
                },
                0,
            )),
            SentPktState::Flighting {
                nframes,
                sent_time,
                bytes,
                in_flight,
                has_crypto,
            } => {
                *state = SentPktState::Acked { nframes };
                if in_flight {
                    self.bytes_in_flight -= bytes as u64;
                }
                if has_crypto {
                    self.pending_crypto_count -= 1;
                }
                Ok((
                    PacketAck {
                        pn,
                        sent_time,
                        bytes,
                        was_in_flight: in_flight,
                        has_crypto,
                        spurious_loss: false,
                    },
                    nframes,
                ))
            }
            SentPktState::Lost {
                nframes,
                sent_time,
                bytes,
            } => {
                *state = SentPktState::Acked { nframes };
                Ok((
                    PacketAck {
                        pn,
                        sent_time,
                        bytes,
                        was_in_flight: false,
                        has_crypto: false,
                        spurious_loss: true,
                    },
                    // the frames were already fed back on loss
                    0,
                ))
            }
        }
    }

    fn may_loss_packet(&mut self, pn: u64) -> Option<(PacketLoss, usize)> {
        let state = self.sent_packets.get_mut(pn)?;
        match *state {
            SentPktState::Flighting {
                nframes,
                sent_time,
                bytes,
                in_flight,
                has_crypto,
            } => {
                *state = SentPktState::Lost {
                    nframes,
                    sent_time,
                    bytes,
                };
                if in_flight {
                    self.bytes_in_flight -= bytes as u64;
                }
                if has_crypto {
                    self.pending_crypto_count -= 1;
                }
                Some((
                    PacketLoss {
                        pn,
                        sent_time,
                        bytes,
                        was_in_flight: in_flight,
                    },
                    nframes,
                ))
            }
            _ => None,
        }
    }

    /// Pop front entries that are no longer useful: everything at least a
    /// reordering window below the largest acked that is neither in flight
    /// nor carrying unacknowledged retransmittable data.
    fn resize(&mut self) {
        const SPURIOUS_LOSS_WINDOW: u64 = 20;
        let Some(largest_acked) = self.largest_acked_pktno else {
            return;
        };
        let horizon = largest_acked.saturating_sub(SPURIOUS_LOSS_WINDOW);
        let (n, f) = self
            .sent_packets
            .enumerate()
            .take_while(|(pn, s)| {
                *pn < horizon
                    && !matches!(
                        s,
                        SentPktState::Flighting { .. } | SentPktState::Lost { .. }
                    )
            })
            .fold((0usize, 0usize), |(n, f), (_, s)| (n + 1, f + s.nframes()));
        self.sent_packets.advance(n);
        _ = self.queue.drain(..f);
    }
}

impl<T: Clone> SentJournal<T> {
    fn neuter_packets(&mut self) -> Vec<u64> {
        let mut neutered = Vec::new();
        for (pn, state) in self.sent_packets.enumerate_mut() {
            if let SentPktState::Flighting {
                nframes,
                bytes,
                in_flight,
                has_crypto,
                ..
            } = *state
            {
                *state = SentPktState::Neutered { nframes };
                if in_flight {
                    self.bytes_in_flight -= bytes as u64;
                }
                if has_crypto {
                    self.pending_crypto_count -= 1;
                }
                neutered.push(pn);
            }
        }
        neutered
    }
}

/// Records for sent packets and the frames in them, one journal per packet
/// number space.
///
/// Data and crypto streams need to be aware of frame acknowledgment or
/// possible loss. This structure records the reliable frames (type T) in
/// each packet sent, and feeds them back when the packet is acknowledged
/// (so buffers can be released) or declared lost (so the owners can decide
/// to retransmit).
///
/// The interfaces live on the [`NewPacketGuard`] and [`SentRotateGuard`]
/// structures; both hold a [`MutexGuard`] so concurrent recorders cannot
/// interleave half-built packets.
#[derive(Debug, Default)]
pub struct ArcSentJournal<T>(Arc<Mutex<SentJournal<T>>>);

impl<T> Clone for ArcSentJournal<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> ArcSentJournal<T> {
    /// Create a new empty journal with the given `capacity`.
    ///
    /// The number of records can exceed the `capacity` specified at
    /// creation time, but the internal implementation strives to avoid
    /// reallocation.
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Arc::new(Mutex::new(SentJournal::with_capacity(capacity))))
    }

    /// Return a [`SentRotateGuard`] to resolve an ack frame from the peer.
    pub fn rotate(&self) -> SentRotateGuard<'_, T> {
        SentRotateGuard {
            inner: self.0.lock().unwrap(),
        }
    }

    /// Return a [`NewPacketGuard`] to get the next pn and record the frames
    /// in the packet.
    pub fn new_packet(&self) -> NewPacketGuard<'_, T> {
        let inner = self.0.lock().unwrap();
        let origin_len = inner.queue.len();
        NewPacketGuard {
            trivial: false,
            origin_len,
            inner,
        }
    }

    /// Sum of the bytes of all in-flight packets in this journal.
    pub fn bytes_in_flight(&self) -> u64 {
        self.0.lock().unwrap().bytes_in_flight
    }

    /// The number of outstanding packets still carrying crypto data.
    pub fn pending_crypto_count(&self) -> usize {
        self.0.lock().unwrap().pending_crypto_count
    }

    /// The largest packet number the peer has acknowledged so far.
    pub fn largest_acked(&self) -> Option<u64> {
        self.0.lock().unwrap().largest_acked_pktno
    }
}

impl<T: Clone> ArcSentJournal<T> {
    /// Mark every outstanding packet unackable after a key advance and
    /// return their numbers, so pacing and sampling can forget them.
    pub fn neuter_packets(&self) -> Vec<u64> {
        self.0.lock().unwrap().neuter_packets()
    }
}

/// Handle the peer's ack frame and feed the frames in the acknowledged or
/// possibly lost packets back to the components that sent them.
pub struct SentRotateGuard<'a, T> {
    inner: MutexGuard<'a, SentJournal<T>>,
}

impl<T: Clone> SentRotateGuard<'_, T> {
    /// Handle the `Largest Acknowledged` field of an ack frame from the peer.
    pub fn update_largest(&mut self, ack_frame: &AckFrame) -> Result<(), QuicError> {
        if ack_frame.largest() >= self.inner.sent_packets.largest() {
            tracing::error!(
                "received an invalid ack frame whose largest pn is larger than the largest pn sent"
            );
            return Err(QuicError::new(
                ErrorKind::ProtocolViolation,
                ack_frame.frame_type(),
                "ack frame largest pn is larger than the largest pn sent",
            ));
        }
        if Some(ack_frame.largest()) > self.inner.largest_acked_pktno {
            self.inner.largest_acked_pktno = Some(ack_frame.largest());
        }
        Ok(())
    }

    /// Called for each packet the ack frame covers. Returns the packet's
    /// recovery metadata and an iterator over the frames it carried, so
    /// their owners can release buffers.
    ///
    /// Re-acknowledging an already acked or obsolete packet is a silent
    /// no-op; acknowledging a skipped or neutered packet is the peer's
    /// protocol violation, reported as the corresponding [`AckError`].
    pub fn on_packet_acked(
        &mut self,
        pn: u64,
    ) -> Result<(PacketAck, impl Iterator<Item = T> + '_), AckError> {
        let offset = self.inner.frame_offset(pn);
        let (ack, len) = self.inner.on_packet_acked(pn)?;
        Ok((ack, self.inner.queue.range(offset..offset + len).cloned()))
    }

    /// Called when a sent packet is declared lost; returns the frames in
    /// that packet so their owners can decide, frame by frame, whether to
    /// retransmit.
    pub fn may_loss_packet(
        &mut self,
        pn: u64,
    ) -> Option<(PacketLoss, impl Iterator<Item = T> + '_)> {
        let offset = self.inner.frame_offset(pn);
        let (loss, len) = self.inner.may_loss_packet(pn)?;
        Some((loss, self.inner.queue.range(offset..offset + len).cloned()))
    }
}

impl<T> Drop for SentRotateGuard<'_, T> {
    fn drop(&mut self) {
        self.inner.resize();
    }
}

/// Provide the next packet number to assemble a packet, and record the
/// frames in the packet which will be sent.
///
/// One [`NewPacketGuard`] corresponds to one packet. Even if the next
/// packet number is obtained, the packet may not be sent out. If the
/// packet is not sent out, the packet number will not be consumed.
///
/// Calling [`NewPacketGuard::record_trivial`] or [`NewPacketGuard::record_frame`]
/// means the corresponding packet will be sent; the packet number is
/// consumed when the guard is built.
#[derive(Debug)]
pub struct NewPacketGuard<'a, T> {
    trivial: bool,
    origin_len: usize,
    inner: MutexGuard<'a, SentJournal<T>>,
}

impl<T> NewPacketGuard<'_, T> {
    /// The packet number this packet will carry.
    ///
    /// Calling this method multiple times on the same guard yields the
    /// same pn.
    pub fn pn(&self) -> u64 {
        self.inner.sent_packets.largest()
    }

    /// Records trivial frames that do not need retransmission, such as
    /// Padding, Ping and Ack. Such a packet still occupies a packet number
    /// and must be recorded, with zero reliable frames.
    pub fn record_trivial(&mut self) {
        self.trivial = true;
    }

    /// Records a reliable frame in the packet being sent.
    ///
    /// When the packet is acked or may be lost, the frames in the packet
    /// are fed back to the components which sent them.
    pub fn record_frame(&mut self, frame: T) {
        self.inner.deref_mut().push_back(frame);
    }

    /// Deliberately burn this packet number, leaving a gap the peer cannot
    /// legally acknowledge.
    pub fn skip_pn(mut self) {
        debug_assert_eq!(self.inner.queue.len(), self.origin_len);
        self.inner
            .sent_packets
            .push_back(SentPktState::Skipped)
            .expect("packet number never overflows");
    }

    /// Consume the packet number and store the packet's recovery metadata.
    pub fn build(mut self, bytes: u32, in_flight: bool, has_crypto: bool) {
        let nframes = self.inner.queue.len() - self.origin_len;
        if !self.trivial && nframes == 0 {
            return;
        }
        let sent_time = Instant::now();
        if in_flight {
            self.inner.bytes_in_flight += bytes as u64;
        }
        if has_crypto {
            self.inner.pending_crypto_count += 1;
        }
        self.inner
            .sent_packets
            .push_back(SentPktState::new_flighting(
                nframes, sent_time, bytes, in_flight, has_crypto,
            ))
            .expect("packet number never overflows");
    }
}

#[cfg(test)]
mod tests {
    use qcore::{
        frame::{FrameType, MaxDataFrame},
        varint::VarInt,
    };

    use super::*;

    fn send_one(journal: &ArcSentJournal<MaxDataFrame>, bytes: u32) -> u64 {
        let mut guard = journal.new_packet();
        let pn = guard.pn();
        guard.record_frame(MaxDataFrame::new(VarInt::from_u32(1024)));
        guard.build(bytes, true, false);
        pn
    }

    fn ack_frame(largest: u32) -> AckFrame {
        AckFrame::new(
            VarInt::from_u32(largest),
            VarInt::ZERO,
            VarInt::ZERO,
            vec![],
            None,
        )
    }

    #[test]
    fn test_pn_consumed_only_when_built() {
        let journal = ArcSentJournal::<MaxDataFrame>::with_capacity(8);
        {
            let guard = journal.new_packet();
            assert_eq!(guard.pn(), 0);
            // dropped without recording anything: pn not consumed
        }
        assert_eq!(journal.new_packet().pn(), 0);
        send_one(&journal, 1200);
        assert_eq!(journal.new_packet().pn(), 1);
    }

    #[test]
    fn test_bytes_in_flight_accounting() {
        let journal = ArcSentJournal::<MaxDataFrame>::with_capacity(8);
        let p0 = send_one(&journal, 1200);
        let p1 = send_one(&journal, 800);
        assert_eq!(journal.bytes_in_flight(), 2000);

        let mut rotate = journal.rotate();
        rotate.update_largest(&ack_frame(1)).unwrap();
        let (ack, frames) = rotate.on_packet_acked(p1).unwrap();
        assert_eq!(ack.bytes, 800);
        assert!(ack.was_in_flight);
        assert_eq!(frames.count(), 1);
        drop(rotate);
        assert_eq!(journal.bytes_in_flight(), 1200);

        let mut rotate = journal.rotate();
        let (loss, frames) = rotate.may_loss_packet(p0).unwrap();
        assert_eq!(loss.bytes, 1200);
        assert_eq!(frames.count(), 1);
        drop(rotate);
        assert_eq!(journal.bytes_in_flight(), 0);
    }

    #[test]
    fn test_ack_after_loss_is_spurious() {
        let journal = ArcSentJournal::<MaxDataFrame>::with_capacity(8);
        let p0 = send_one(&journal, 1200);
        send_one(&journal, 1200);

        let mut rotate = journal.rotate();
        rotate.update_largest(&ack_frame(1)).unwrap();
        assert!(rotate.may_loss_packet(p0).is_some());
        let (ack, frames) = rotate.on_packet_acked(p0).unwrap();
        assert!(ack.spurious_loss);
        assert!(!ack.was_in_flight);
        // the frames were already fed back when the loss was declared
        assert_eq!(frames.count(), 0);
    }

    #[test]
    fn test_ack_skipped_and_neutered_packets() {
        let journal = ArcSentJournal::<MaxDataFrame>::with_capacity(8);
        journal.new_packet().skip_pn();
        let p1 = send_one(&journal, 1200);

        let mut rotate = journal.rotate();
        rotate.update_largest(&ack_frame(1)).unwrap();
        assert_eq!(
            rotate.on_packet_acked(0).err().unwrap(),
            AckError::UnsentPacketsAcked
        );
        drop(rotate);

        let neutered = journal.neuter_packets();
        assert_eq!(neutered, vec![p1]);
        assert_eq!(journal.bytes_in_flight(), 0);

        let mut rotate = journal.rotate();
        assert_eq!(
            rotate.on_packet_acked(p1).err().unwrap(),
            AckError::UnackablePacketsAcked
        );
    }

    #[test]
    fn test_ack_beyond_largest_sent() {
        let journal = ArcSentJournal::<MaxDataFrame>::with_capacity(8);
        send_one(&journal, 1200);
        let mut rotate = journal.rotate();
        let error = rotate.update_largest(&ack_frame(7)).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn test_duplicate_ack_is_noop() {
        let journal = ArcSentJournal::<MaxDataFrame>::with_capacity(8);
        let p0 = send_one(&journal, 1200);
        let mut rotate = journal.rotate();
        rotate.update_largest(&ack_frame(0)).unwrap();
        let (first, _) = rotate.on_packet_acked(p0).unwrap();
        assert_eq!(first.bytes, 1200);
        let (again, frames) = rotate.on_packet_acked(p0).unwrap();
        assert_eq!(again.bytes, 0);
        assert!(!again.was_in_flight);
        assert_eq!(frames.count(), 0);
    }

    #[test]
    fn test_obsolete_packets_removed() {
        let journal = ArcSentJournal::<MaxDataFrame>::with_capacity(8);
        for _ in 0..30 {
            send_one(&journal, 100);
        }
        let mut rotate = journal.rotate();
        rotate.update_largest(&ack_frame(29)).unwrap();
        for pn in 0..30 {
            rotate.on_packet_acked(pn).unwrap();
        }
        drop(rotate);
        // everything below largest_acked - window is gone, and re-acking
        // an obsolete packet stays a no-op
        let mut rotate = journal.rotate();
        let (ack, _) = rotate.on_packet_acked(0).unwrap();
        assert_eq!(ack.bytes, 0);
    }

    #[test]
    fn test_crypto_pending_count() {
        let journal = ArcSentJournal::<MaxDataFrame>::with_capacity(8);
        let mut guard = journal.new_packet();
        guard.record_frame(MaxDataFrame::new(VarInt::from_u32(1)));
        guard.build(600, true, true);
        assert_eq!(journal.pending_crypto_count(), 1);

        let mut rotate = journal.rotate();
        rotate.update_largest(&ack_frame(0)).unwrap();
        rotate.on_packet_acked(0).unwrap();
        drop(rotate);
        assert_eq!(journal.pending_crypto_count(), 0);
    }

    #[test]
    fn test_frame_type_is_reported() {
        let frame = MaxDataFrame::new(VarInt::from_u32(1));
        assert_eq!(frame.frame_type(), FrameType::MaxData);
    }
}
