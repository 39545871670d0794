use std::{collections::VecDeque, sync::Arc, time::Duration};

use qcore::{
    config::TransportConfig,
    epoch::Epoch,
    error::{ErrorKind, QuicError},
    frame::{AckFrame, GetFrameType},
};
use tokio::time::Instant;

use crate::{
    Acked, Lost, SendAlgorithm,
    bandwidth::Bandwidth,
    bbr2::{Bbr2Controller, Bbr2Params},
    cubic::CubicController,
    loss::{LossCandidate, LossDetector},
    pacing::PacingSender,
    rtt::{GRANULARITY, RttEstimator},
    status::HandshakeStatus,
};

const MIN_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(10);
const MIN_TLP_TIMEOUT: Duration = Duration::from_millis(10);
const MIN_RTO_TIMEOUT: Duration = Duration::from_millis(200);
const MAX_RETRANSMISSION_TIME: Duration = Duration::from_secs(60);
const MAX_RTO_PACKETS: usize = 2;

/// Why a packet was (re)transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionType {
    Initial,
    LossRetransmission,
    TlpRetransmission,
    RtoRetransmission,
    PtoRetransmission,
    PathProbe,
}

/// The retransmission timer's mode, selected leaves-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Crypto data outstanding before the handshake completes.
    Handshake,
    /// The loss detector has packets waiting on the time threshold.
    Loss,
    /// Tail loss probes before the RTO fallback.
    Tlp,
    /// Classic retransmission timeout.
    Rto,
    /// The RFC 9002 probe timeout.
    Pto,
}

/// What a fired retransmission timer asks the connection to do.
#[derive(Debug, PartialEq, Eq)]
pub enum TimeoutEvent {
    /// Retransmit the crypto data of these packets with new numbers.
    HandshakeRetransmission { packets: Vec<u64> },
    /// These packets crossed the loss time threshold.
    Loss { packets: Vec<u64> },
    /// Send one tail loss probe.
    TailLossProbe,
    /// Retransmit the two oldest outstanding packets.
    RtoRetransmission { packets: Vec<u64> },
    /// Send up to this many probe packets.
    ProbeTimeout { packets: usize },
}

/// What one ack frame did, for the journals to mirror.
#[derive(Debug, Default)]
pub struct AckOutcome {
    pub acked: Vec<Acked>,
    pub lost: Vec<Lost>,
}

#[derive(Debug, Clone, Copy)]
struct SentMeta {
    pn: u64,
    sent_time: Instant,
    bytes: u64,
    ack_eliciting: bool,
    in_flight: bool,
    has_crypto: bool,
    transmission_type: TransmissionType,
}

#[derive(Debug, Default)]
struct EpochState {
    // ascending by pn; entries leave on ack, loss or neutering
    unacked: VecDeque<SentMeta>,
    largest_acked: Option<u64>,
    largest_sent: Option<u64>,
    loss_time: Option<Instant>,
    time_of_last_ack_eliciting: Option<Instant>,
    // recently declared-lost packets, for spurious-loss detection
    declared_lost: VecDeque<(u64, u64)>,
}

impl EpochState {
    fn has_in_flight(&self) -> bool {
        self.unacked.iter().any(|meta| meta.in_flight)
    }

    fn pending_crypto_count(&self) -> usize {
        self.unacked.iter().filter(|meta| meta.has_crypto).count()
    }
}

/// Owns the congestion controller, the pacer, the RTT estimator and the
/// loss detector, and runs the retransmission-timer state machine over
/// the per-space in-flight bookkeeping.
pub struct SentPacketManager {
    config: TransportConfig,
    status: Arc<HandshakeStatus>,
    rtt: RttEstimator,
    detector: LossDetector,
    pacer: PacingSender<Box<dyn SendAlgorithm>>,
    spaces: [EpochState; Epoch::count()],
    bytes_in_flight: u64,
    peer_max_ack_delay: Duration,

    consecutive_crypto_retransmissions: u32,
    consecutive_tlp_count: u32,
    consecutive_rto_count: u32,
    consecutive_pto_count: u32,
    /// The first packet number sent after the first RTO; an ack of
    /// anything older proves the RTO spurious.
    first_rto_transmission: Option<u64>,
}

impl SentPacketManager {
    pub fn new(
        config: TransportConfig,
        status: Arc<HandshakeStatus>,
        peer_max_ack_delay: Duration,
        algorithm: Box<dyn SendAlgorithm>,
    ) -> Self {
        let pacing = config.pacing;
        Self {
            detector: LossDetector::new(&config.loss),
            pacer: PacingSender::new(algorithm, pacing),
            config,
            status,
            rtt: RttEstimator::default(),
            spaces: Default::default(),
            bytes_in_flight: 0,
            peer_max_ack_delay,
            consecutive_crypto_retransmissions: 0,
            consecutive_tlp_count: 0,
            consecutive_rto_count: 0,
            consecutive_pto_count: 0,
            first_rto_transmission: None,
        }
    }

    /// The classic loss-based configuration.
    pub fn with_cubic(
        config: TransportConfig,
        status: Arc<HandshakeStatus>,
        peer_max_ack_delay: Duration,
    ) -> Self {
        let cubic = CubicController::new(config.initial_congestion_window_packets as u64);
        Self::new(config, status, peer_max_ack_delay, Box::new(cubic))
    }

    /// The model-based configuration.
    pub fn with_bbr2(
        config: TransportConfig,
        status: Arc<HandshakeStatus>,
        peer_max_ack_delay: Duration,
    ) -> Self {
        let bbr = Bbr2Controller::new(
            config.initial_congestion_window_packets as u64,
            Bbr2Params::default(),
        );
        Self::new(config, status, peer_max_ack_delay, Box::new(bbr))
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    pub fn congestion_window(&self) -> u64 {
        self.pacer.congestion_window()
    }

    pub fn bandwidth_estimate(&self) -> Bandwidth {
        self.pacer.bandwidth_estimate()
    }

    /// Delay before the next packet may be sent; `None` when the window
    /// refuses.
    pub fn time_until_send(&self, now: Instant) -> Option<Duration> {
        self.pacer.time_until_send(now, self.bytes_in_flight)
    }

    /// The sender went idle with window to spare.
    pub fn on_application_limited(&mut self) {
        self.pacer.on_application_limited(self.bytes_in_flight);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_packet_sent(
        &mut self,
        epoch: Epoch,
        pn: u64,
        now: Instant,
        bytes: u64,
        ack_eliciting: bool,
        in_flight: bool,
        has_crypto: bool,
        transmission_type: TransmissionType,
    ) {
        let space = &mut self.spaces[epoch];
        debug_assert!(
            space.largest_sent.map_or(true, |largest| pn > largest),
            "packet numbers must increase within a space"
        );
        space.largest_sent = Some(pn);
        space.unacked.push_back(SentMeta {
            pn,
            sent_time: now,
            bytes,
            ack_eliciting,
            in_flight,
            has_crypto,
            transmission_type,
        });
        if ack_eliciting {
            space.time_of_last_ack_eliciting = Some(now);
        }
        if in_flight {
            self.pacer
                .on_packet_sent(now, self.bytes_in_flight, pn, bytes, ack_eliciting);
            self.bytes_in_flight += bytes;
        }
    }

    /// Digest one ACK frame. The outcome lists what to mirror into the
    /// per-space journal: freshly acked packets and freshly lost ones.
    pub fn on_ack_frame(
        &mut self,
        epoch: Epoch,
        frame: &AckFrame,
        ack_receive_time: Instant,
        ack_delay_exponent: u8,
    ) -> Result<AckOutcome, QuicError> {
        let largest_acked = frame.largest();
        {
            let space = &self.spaces[epoch];
            if space.largest_sent.map_or(true, |sent| largest_acked > sent) {
                return Err(QuicError::new(
                    ErrorKind::ProtocolViolation,
                    frame.frame_type(),
                    "ack frame covers packets never sent in its packet number space",
                ));
            }
        }

        let prior_in_flight = self.bytes_in_flight;
        let ack_delay = Duration::from_micros(frame.delay() << ack_delay_exponent)
            .min(self.peer_max_ack_delay);

        // collect the newly acked packets, removing them from the space
        let mut outcome = AckOutcome::default();
        let ranges: Vec<_> = frame.iter().collect();
        let space = &mut self.spaces[epoch];
        let mut rtt_updated = false;
        let mut kept = VecDeque::with_capacity(space.unacked.len());
        while let Some(meta) = space.unacked.pop_front() {
            let covered = ranges.iter().any(|range| range.contains(&meta.pn));
            if !covered {
                kept.push_back(meta);
                continue;
            }
            if meta.pn == largest_acked && meta.sent_time <= ack_receive_time {
                self.rtt.update(
                    ack_receive_time.duration_since(meta.sent_time),
                    ack_delay,
                    ack_receive_time,
                );
                rtt_updated = true;
            }
            if meta.in_flight {
                self.bytes_in_flight -= meta.bytes;
            }
            outcome.acked.push(Acked {
                pn: meta.pn,
                bytes: meta.bytes,
                sent_time: meta.sent_time,
                event_time: ack_receive_time,
            });
        }
        space.unacked = kept;
        space.largest_acked = Some(
            space
                .largest_acked
                .map_or(largest_acked, |prev| prev.max(largest_acked)),
        );

        // acks that land on packets we declared lost were spurious
        let mut spurious = Vec::new();
        space.declared_lost.retain(|(pn, distance)| {
            let acked_now = ranges.iter().any(|range| range.contains(pn));
            if acked_now {
                spurious.push((*pn, *distance));
            }
            !acked_now
        });
        for (pn, distance) in &spurious {
            tracing::debug!(pn, "spurious loss detected");
            self.detector.on_spurious_loss(*distance);
            outcome.lost.push(Lost {
                pn: *pn,
                bytes: 0,
                sent_time: ack_receive_time,
                spurious: true,
            });
        }

        if !outcome.acked.is_empty() {
            let largest_newly = outcome.acked.iter().map(|acked| acked.pn).max();
            match (self.first_rto_transmission, largest_newly) {
                (Some(first_rto), Some(largest)) if largest < first_rto => {
                    // the RTO was premature: only the smoothed metrics
                    // were stale, the backoff state stays
                    self.rtt.expire_smoothed_metrics();
                }
                _ => {
                    // forward progress resets the backoff state
                    self.first_rto_transmission = None;
                    self.consecutive_crypto_retransmissions = 0;
                    self.consecutive_tlp_count = 0;
                    self.consecutive_rto_count = 0;
                    self.consecutive_pto_count = 0;
                }
            }
        }

        // loss detection against the new largest acked
        self.detect_losses(epoch, ack_receive_time, &mut outcome);

        // hand the event to the congestion side; while in pure-RTO
        // recovery the losses were already paid for by the window collapse
        let discard_losses = self.consecutive_rto_count > 0 && !self.config.use_new_rto;
        let lost_for_cc: Vec<Lost> = if discard_losses {
            Vec::new()
        } else {
            outcome.lost.clone()
        };
        self.pacer.on_congestion_event(
            rtt_updated,
            prior_in_flight,
            ack_receive_time,
            &outcome.acked,
            &lost_for_cc,
            &self.rtt,
        );
        Ok(outcome)
    }

    fn detect_losses(&mut self, epoch: Epoch, now: Instant, outcome: &mut AckOutcome) {
        let Some(largest_acked) = self.spaces[epoch].largest_acked else {
            return;
        };
        let candidates: Vec<LossCandidate> = self.spaces[epoch]
            .unacked
            .iter()
            .filter(|meta| meta.pn <= largest_acked)
            .map(|meta| LossCandidate {
                pn: meta.pn,
                sent_time: meta.sent_time,
                bytes: meta.bytes,
            })
            .collect();
        let result = self.detector.detect(largest_acked, &self.rtt, now, &candidates);
        let space = &mut self.spaces[epoch];
        space.loss_time = result.loss_time;

        for lost in &result.lost {
            let Some(position) = space.unacked.iter().position(|meta| meta.pn == lost.pn)
            else {
                continue;
            };
            let meta = space.unacked.remove(position).expect("position just found");
            if meta.in_flight {
                self.bytes_in_flight -= meta.bytes;
            }
            space
                .declared_lost
                .push_back((meta.pn, largest_acked - meta.pn));
            if space.declared_lost.len() > 64 {
                space.declared_lost.pop_front();
            }
            outcome.lost.push(Lost {
                pn: meta.pn,
                bytes: meta.bytes,
                sent_time: meta.sent_time,
                spurious: false,
            });
        }
    }

    /// The journal neutered these packets after a key advance; drop their
    /// recovery state without declaring anything lost.
    pub fn on_packets_neutered(&mut self, epoch: Epoch, pns: &[u64]) {
        let space = &mut self.spaces[epoch];
        space.unacked.retain(|meta| {
            if pns.contains(&meta.pn) {
                if meta.in_flight {
                    self.bytes_in_flight -= meta.bytes;
                }
                false
            } else {
                true
            }
        });
    }

    fn has_unacked_retransmittable(&self) -> bool {
        self.spaces
            .iter()
            .any(|space| space.unacked.iter().any(|meta| meta.ack_eliciting))
    }

    fn pending_crypto_packets(&self) -> usize {
        self.spaces
            .iter()
            .map(EpochState::pending_crypto_count)
            .sum()
    }

    /// Select the timer mode, leaves-first.
    pub fn retransmission_mode(&self) -> TimerMode {
        if !self.status.is_handshake_confirmed() && self.pending_crypto_packets() > 0 {
            return TimerMode::Handshake;
        }
        if self.spaces.iter().any(|space| space.loss_time.is_some()) {
            return TimerMode::Loss;
        }
        if self.config.pto_enabled {
            return TimerMode::Pto;
        }
        if (self.consecutive_tlp_count as usize) < self.config.max_tail_loss_probes
            && self.has_unacked_retransmittable()
        {
            return TimerMode::Tlp;
        }
        TimerMode::Rto
    }

    /// The deadline the retransmission alarm should be set to, if any.
    pub fn retransmission_deadline(&self) -> Option<(Instant, TimerMode)> {
        if !self.has_unacked_retransmittable()
            && self.status.peer_completed_address_validation()
        {
            return None;
        }
        let mode = self.retransmission_mode();
        let deadline = match mode {
            TimerMode::Handshake => {
                let last_crypto_sent = self
                    .spaces
                    .iter()
                    .flat_map(|space| space.unacked.iter())
                    .filter(|meta| meta.has_crypto)
                    .map(|meta| meta.sent_time)
                    .max()?;
                last_crypto_sent + self.handshake_delay()
            }
            TimerMode::Loss => self
                .spaces
                .iter()
                .filter_map(|space| space.loss_time)
                .min()?,
            TimerMode::Tlp => self.last_ack_eliciting_sent_time()? + self.tlp_delay(),
            TimerMode::Rto => self.last_ack_eliciting_sent_time()? + self.rto_delay(),
            TimerMode::Pto => {
                // the space whose last in-flight send is earliest owns
                // the deadline
                let base = self
                    .spaces
                    .iter()
                    .filter(|space| space.has_in_flight())
                    .filter_map(|space| space.time_of_last_ack_eliciting)
                    .min()?;
                base + self.pto_delay()
            }
        };
        Some((deadline, mode))
    }

    fn last_ack_eliciting_sent_time(&self) -> Option<Instant> {
        self.spaces
            .iter()
            .filter_map(|space| space.time_of_last_ack_eliciting)
            .max()
    }

    fn handshake_delay(&self) -> Duration {
        let base = if self.config.conservative_handshake_retransmits {
            (self.rtt.smoothed_rtt() * 2).max(MIN_HANDSHAKE_TIMEOUT) + self.peer_max_ack_delay
        } else {
            (self.rtt.smoothed_rtt() * 3 / 2).max(MIN_HANDSHAKE_TIMEOUT)
        };
        base * (1 << self.consecutive_crypto_retransmissions)
    }

    fn tlp_delay(&self) -> Duration {
        let srtt = self.rtt.smoothed_rtt();
        if self.config.enable_half_rtt_tail_loss_probe && self.consecutive_tlp_count == 0 {
            return (srtt / 2).max(MIN_TLP_TIMEOUT);
        }
        (srtt * 2).max(MIN_TLP_TIMEOUT)
    }

    fn rto_delay(&self) -> Duration {
        let base = (self.rtt.smoothed_rtt() + self.rtt.rttvar() * 4).max(MIN_RTO_TIMEOUT);
        (base * (1 << self.consecutive_rto_count.min(10))).min(MAX_RETRANSMISSION_TIME)
    }

    fn pto_delay(&self) -> Duration {
        let srtt = match (self.config.first_pto_srtt_multiplier, self.consecutive_pto_count) {
            (Some(multiplier), 0) => self.rtt.smoothed_rtt().mul_f32(multiplier),
            _ => self.rtt.smoothed_rtt(),
        };
        let mut delay = srtt + (self.rtt.rttvar() * 4).max(GRANULARITY);
        if self.config.pto_include_max_ack_delay {
            delay += self.peer_max_ack_delay;
        }
        let backoff = self
            .consecutive_pto_count
            .saturating_sub(self.config.pto_exponential_backoff_start_point)
            .min(10);
        delay * (1 << backoff)
    }

    /// The alarm fired: decide what to do based on the current mode.
    pub fn on_retransmission_timeout(&mut self, now: Instant) -> TimeoutEvent {
        match self.retransmission_mode() {
            TimerMode::Handshake => {
                self.consecutive_crypto_retransmissions += 1;
                let packets = self
                    .spaces
                    .iter()
                    .flat_map(|space| space.unacked.iter())
                    .filter(|meta| meta.has_crypto)
                    .map(|meta| meta.pn)
                    .collect();
                TimeoutEvent::HandshakeRetransmission { packets }
            }
            TimerMode::Loss => {
                let mut outcome = AckOutcome::default();
                for &epoch in Epoch::iter() {
                    if self.spaces[epoch].loss_time.is_some() {
                        self.detect_losses(epoch, now, &mut outcome);
                    }
                }
                let prior_in_flight = self.bytes_in_flight
                    + outcome.lost.iter().map(|lost| lost.bytes).sum::<u64>();
                self.pacer.on_congestion_event(
                    false,
                    prior_in_flight,
                    now,
                    &[],
                    &outcome.lost,
                    &self.rtt,
                );
                TimeoutEvent::Loss {
                    packets: outcome.lost.iter().map(|lost| lost.pn).collect(),
                }
            }
            TimerMode::Tlp => {
                self.consecutive_tlp_count += 1;
                TimeoutEvent::TailLossProbe
            }
            TimerMode::Rto => {
                if self.first_rto_transmission.is_none() {
                    let next = self
                        .spaces
                        .iter()
                        .filter_map(|space| space.largest_sent)
                        .max()
                        .map_or(0, |largest| largest + 1);
                    self.first_rto_transmission = Some(next);
                }
                self.consecutive_rto_count += 1;
                let packets: Vec<u64> = self
                    .spaces
                    .iter()
                    .flat_map(|space| space.unacked.iter())
                    .filter(|meta| meta.in_flight && meta.ack_eliciting)
                    .map(|meta| meta.pn)
                    .take(MAX_RTO_PACKETS)
                    .collect();
                self.pacer.on_retransmission_timeout(!packets.is_empty());
                TimeoutEvent::RtoRetransmission { packets }
            }
            TimerMode::Pto => {
                self.consecutive_pto_count += 1;
                TimeoutEvent::ProbeTimeout {
                    packets: self.config.max_probe_packets_per_pto,
                }
            }
        }
    }

    pub fn consecutive_pto_count(&self) -> u32 {
        self.consecutive_pto_count
    }

    /// How a still-tracked packet was transmitted.
    pub fn transmission_type(&self, epoch: Epoch, pn: u64) -> Option<TransmissionType> {
        self.spaces[epoch]
            .unacked
            .iter()
            .find(|meta| meta.pn == pn)
            .map(|meta| meta.transmission_type)
    }
}

#[cfg(test)]
mod tests {
    use qcore::varint::VarInt;

    use super::*;

    fn ack_frame(largest: u32) -> AckFrame {
        AckFrame::new(
            VarInt::from_u32(largest),
            VarInt::ZERO,
            VarInt::ZERO,
            vec![],
            None,
        )
    }

    fn confirmed_status() -> Arc<HandshakeStatus> {
        let status = HandshakeStatus::new(false);
        status.handshake_confirmed();
        Arc::new(status)
    }

    fn manager() -> SentPacketManager {
        SentPacketManager::with_cubic(
            TransportConfig::default(),
            confirmed_status(),
            Duration::from_millis(25),
        )
    }

    fn seed_rtt(manager: &mut SentPacketManager, srtt_ms: u64, rttvar_ms: u64) {
        manager.rtt = RttEstimator::seed(
            Duration::from_millis(srtt_ms),
            Duration::from_millis(rttvar_ms),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_updates_rtt_and_bytes_in_flight() {
        let mut manager = manager();
        let now = Instant::now();
        manager.on_packet_sent(Epoch::Data, 0, now, 1200, true, true, false, TransmissionType::Initial);
        assert_eq!(manager.bytes_in_flight(), 1200);

        tokio::time::advance(Duration::from_millis(100)).await;
        let outcome = manager
            .on_ack_frame(Epoch::Data, &ack_frame(0), Instant::now(), 3)
            .unwrap();
        assert_eq!(outcome.acked.len(), 1);
        assert_eq!(manager.bytes_in_flight(), 0);
        assert_eq!(manager.rtt().latest_rtt(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_of_unsent_packet_is_rejected() {
        let mut manager = manager();
        let now = Instant::now();
        manager.on_packet_sent(Epoch::Data, 0, now, 1200, true, true, false, TransmissionType::Initial);
        let error = manager
            .on_ack_frame(Epoch::Data, &ack_frame(3), now, 3)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ProtocolViolation);

        // the same largest in another space is also unsent there
        let error = manager
            .on_ack_frame(Epoch::Initial, &ack_frame(0), now, 3)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ProtocolViolation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reordering_loss_via_ack() {
        let mut manager = manager();
        let now = Instant::now();
        for pn in 0..5u64 {
            manager.on_packet_sent(Epoch::Data, pn, now, 1200, true, true, false, TransmissionType::Initial);
        }
        // ack only packet 4: packets 0 and 1 are 3+ behind
        let outcome = manager
            .on_ack_frame(Epoch::Data, &ack_frame(4), now, 3)
            .unwrap();
        assert_eq!(outcome.acked.len(), 1);
        let lost: Vec<u64> = outcome.lost.iter().map(|lost| lost.pn).collect();
        assert_eq!(lost, vec![0, 1]);
        // 2 and 3 are within the reordering threshold, timer pending
        assert_eq!(manager.retransmission_mode(), TimerMode::Loss);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spurious_loss_reported_on_late_ack() {
        let mut manager = manager();
        let now = Instant::now();
        for pn in 0..5u64 {
            manager.on_packet_sent(Epoch::Data, pn, now, 1200, true, true, false, TransmissionType::Initial);
        }
        manager
            .on_ack_frame(Epoch::Data, &ack_frame(4), now, 3)
            .unwrap();
        // packet 0 was declared lost; its ack now is spurious
        let frame = AckFrame::new(
            VarInt::from_u32(4),
            VarInt::ZERO,
            VarInt::ZERO,
            vec![(VarInt::from_u32(2), VarInt::from_u32(0))],
            None,
        );
        let outcome = manager.on_ack_frame(Epoch::Data, &frame, now, 3).unwrap();
        assert!(outcome.lost.iter().any(|lost| lost.pn == 0 && lost.spurious));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pto_timing_and_backoff() {
        let mut manager = manager();
        seed_rtt(&mut manager, 50, 10);
        let now = Instant::now();
        manager.on_packet_sent(Epoch::Data, 0, now, 1200, true, true, false, TransmissionType::Initial);

        // pto = 50 + max(4*10, 1) + 25 = 115ms
        let (deadline, mode) = manager.retransmission_deadline().unwrap();
        assert_eq!(mode, TimerMode::Pto);
        assert_eq!(deadline, now + Duration::from_millis(115));

        // the first fire doubles the delay: 230ms from the same base
        assert_eq!(
            manager.on_retransmission_timeout(now + Duration::from_millis(115)),
            TimeoutEvent::ProbeTimeout { packets: 2 }
        );
        let (deadline, _) = manager.retransmission_deadline().unwrap();
        assert_eq!(deadline, now + Duration::from_millis(230));

        // an ack of a new packet resets the backoff
        manager
            .on_ack_frame(Epoch::Data, &ack_frame(0), now + Duration::from_millis(120), 3)
            .unwrap();
        assert_eq!(manager.consecutive_pto_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tlp_then_rto_when_pto_disabled() {
        let config = TransportConfig {
            pto_enabled: false,
            ..Default::default()
        };
        let mut manager = SentPacketManager::with_cubic(
            config,
            confirmed_status(),
            Duration::from_millis(25),
        );
        seed_rtt(&mut manager, 50, 10);
        let now = Instant::now();
        manager.on_packet_sent(Epoch::Data, 0, now, 1200, true, true, false, TransmissionType::Initial);

        assert_eq!(manager.retransmission_mode(), TimerMode::Tlp);
        let (deadline, _) = manager.retransmission_deadline().unwrap();
        // tlp = max(2*srtt, 10ms)
        assert_eq!(deadline, now + Duration::from_millis(100));

        assert_eq!(manager.on_retransmission_timeout(deadline), TimeoutEvent::TailLossProbe);
        assert_eq!(manager.on_retransmission_timeout(deadline), TimeoutEvent::TailLossProbe);
        // both tail loss probes used: fall back to rto
        assert_eq!(manager.retransmission_mode(), TimerMode::Rto);

        let event = manager.on_retransmission_timeout(deadline);
        assert_eq!(
            event,
            TimeoutEvent::RtoRetransmission { packets: vec![0] }
        );
        // rto backoff doubles
        let d1 = manager.rto_delay();
        let before = manager.consecutive_rto_count;
        manager.on_retransmission_timeout(deadline);
        assert_eq!(manager.consecutive_rto_count, before + 1);
        assert_eq!(manager.rto_delay(), d1 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_mode_wins_while_crypto_pending() {
        let status = Arc::new(HandshakeStatus::new(false));
        let mut manager = SentPacketManager::with_cubic(
            TransportConfig::default(),
            status.clone(),
            Duration::from_millis(25),
        );
        let now = Instant::now();
        manager.on_packet_sent(Epoch::Initial, 0, now, 1200, true, true, true, TransmissionType::Initial);
        assert_eq!(manager.retransmission_mode(), TimerMode::Handshake);

        let event = manager.on_retransmission_timeout(now + Duration::from_secs(1));
        assert_eq!(
            event,
            TimeoutEvent::HandshakeRetransmission { packets: vec![0] }
        );
        // backoff doubled for the next handshake retransmission
        assert_eq!(manager.consecutive_crypto_retransmissions, 1);

        status.handshake_confirmed();
        manager
            .on_ack_frame(Epoch::Initial, &ack_frame(0), now + Duration::from_secs(1), 3)
            .unwrap();
        assert_eq!(manager.retransmission_mode(), TimerMode::Pto);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_timer_without_outstanding_data() {
        let manager = manager();
        assert!(manager.retransmission_deadline().is_none());
    }
}
