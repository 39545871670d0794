use std::{collections::VecDeque, time::Duration};

use qcore::{util::IndexDeque, varint::VARINT_MAX};
use tokio::time::Instant;

use crate::{bandwidth::Bandwidth, minmax::WindowedMaxFilter};

/// Snapshot of the sender's cumulative totals, captured when a packet is
/// sent and read back when it is acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendTimeState {
    pub is_app_limited: bool,
    pub total_bytes_sent: u64,
    pub total_bytes_acked: u64,
    pub total_bytes_lost: u64,
    pub bytes_in_flight: u64,
}

/// One delivery-rate measurement.
#[derive(Debug, Clone, Copy)]
pub struct BandwidthSample {
    /// min(send rate, ack rate): the safe estimate of the path's rate.
    pub bandwidth: Bandwidth,
    pub rtt: Duration,
    pub send_rate: Bandwidth,
    pub state_at_send: SendTimeState,
}

/// Per-packet record the sampler keeps while the packet is in flight.
#[derive(Debug, Clone, Copy)]
struct ConnectionStateOnSentPacket {
    sent_time: Instant,
    size: u64,
    total_bytes_sent_at_last_acked_packet: u64,
    last_acked_packet_sent_time: Option<Instant>,
    last_acked_packet_ack_time: Option<Instant>,
    send_time_state: SendTimeState,
}

/// An established (ack time, total bytes acked) point the ack rate can be
/// measured against.
#[derive(Debug, Clone, Copy)]
struct AckPoint {
    ack_time: Instant,
    total_bytes_acked: u64,
}

/// Tracks the extra bytes delivered inside ack-aggregation epochs and
/// filters their maximum over a window of round trips.
#[derive(Debug)]
pub struct MaxAckHeightTracker {
    max_ack_height_filter: WindowedMaxFilter<u64>,
    aggregation_epoch_start_time: Option<Instant>,
    aggregation_epoch_bytes: u64,
    last_sent_packet_number_before_epoch: u64,
    /// An epoch also ends after a full round of sending.
    reduce_extra_acked_on_bandwidth_increase: bool,
    ack_aggregation_bandwidth_threshold: f64,
    num_ack_aggregation_epochs: u64,
}

impl MaxAckHeightTracker {
    pub fn new(window: u64) -> Self {
        Self {
            max_ack_height_filter: WindowedMaxFilter::new(window),
            aggregation_epoch_start_time: None,
            aggregation_epoch_bytes: 0,
            last_sent_packet_number_before_epoch: 0,
            reduce_extra_acked_on_bandwidth_increase: false,
            ack_aggregation_bandwidth_threshold: 1.0,
            num_ack_aggregation_epochs: 0,
        }
    }

    pub fn get(&self) -> u64 {
        self.max_ack_height_filter.get()
    }

    pub fn num_ack_aggregation_epochs(&self) -> u64 {
        self.num_ack_aggregation_epochs
    }

    /// Feed the bytes newly acked at `ack_time`; returns the extra bytes
    /// beyond what the bandwidth estimate explains.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        bandwidth_estimate: Bandwidth,
        is_new_max_bandwidth: bool,
        round_trip_count: u64,
        last_sent_packet_number: u64,
        last_acked_packet_number: u64,
        ack_time: Instant,
        bytes_acked: u64,
    ) -> u64 {
        let force_new_epoch = if self.reduce_extra_acked_on_bandwidth_increase && is_new_max_bandwidth {
            // a growing estimate reexplains the backlog, restart measuring
            self.max_ack_height_filter
                .reset(0, round_trip_count);
            true
        } else {
            // a full round of sending passed inside this epoch
            last_acked_packet_number > self.last_sent_packet_number_before_epoch
        };

        let Some(epoch_start) = self.aggregation_epoch_start_time else {
            self.aggregation_epoch_bytes = bytes_acked;
            self.aggregation_epoch_start_time = Some(ack_time);
            self.last_sent_packet_number_before_epoch = last_sent_packet_number;
            self.num_ack_aggregation_epochs += 1;
            return 0;
        };

        // the arrival rate sagged below the threshold share of the
        // estimate: the aggregation burst is over, a new epoch begins
        let aggregation_delta = ack_time.duration_since(epoch_start);
        let expected_bytes_acked = bandwidth_estimate.bytes_per_period(aggregation_delta);
        if force_new_epoch
            || self.aggregation_epoch_bytes
                <= (self.ack_aggregation_bandwidth_threshold * expected_bytes_acked as f64) as u64
        {
            self.aggregation_epoch_bytes = bytes_acked;
            self.aggregation_epoch_start_time = Some(ack_time);
            self.last_sent_packet_number_before_epoch = last_sent_packet_number;
            self.num_ack_aggregation_epochs += 1;
            return 0;
        }

        self.aggregation_epoch_bytes += bytes_acked;
        let extra_acked = self
            .aggregation_epoch_bytes
            .saturating_sub(expected_bytes_acked);
        self.max_ack_height_filter.update(extra_acked, round_trip_count);
        extra_acked
    }
}

/// Measures delivery rate per acked packet, following the principle that
/// a safe estimate never exceeds either the rate the data was sent at or
/// the rate it was delivered at.
#[derive(Debug)]
pub struct BandwidthSampler {
    total_bytes_sent: u64,
    total_bytes_acked: u64,
    total_bytes_lost: u64,
    total_bytes_neutered: u64,
    total_bytes_sent_at_last_acked_packet: u64,

    last_acked_packet_sent_time: Option<Instant>,
    last_acked_packet_ack_time: Option<Instant>,
    last_sent_packet: u64,

    is_app_limited: bool,
    end_of_app_limited_phase: Option<u64>,

    connection_state_map: IndexDeque<Option<ConnectionStateOnSentPacket>, VARINT_MAX>,
    // recent ack points, newest last; the A0 choice scans from the back
    a0_candidates: VecDeque<AckPoint>,
    max_ack_height_tracker: MaxAckHeightTracker,
}

const MAX_A0_CANDIDATES: usize = 64;

impl BandwidthSampler {
    pub fn new(max_height_window: u64) -> Self {
        Self {
            total_bytes_sent: 0,
            total_bytes_acked: 0,
            total_bytes_lost: 0,
            total_bytes_neutered: 0,
            total_bytes_sent_at_last_acked_packet: 0,
            last_acked_packet_sent_time: None,
            last_acked_packet_ack_time: None,
            last_sent_packet: 0,
            is_app_limited: false,
            end_of_app_limited_phase: None,
            connection_state_map: IndexDeque::default(),
            a0_candidates: VecDeque::new(),
            max_ack_height_tracker: MaxAckHeightTracker::new(max_height_window),
        }
    }

    pub fn total_bytes_acked(&self) -> u64 {
        self.total_bytes_acked
    }

    pub fn total_bytes_lost(&self) -> u64 {
        self.total_bytes_lost
    }

    pub fn is_app_limited(&self) -> bool {
        self.is_app_limited
    }

    pub fn max_ack_height(&self) -> u64 {
        self.max_ack_height_tracker.get()
    }

    pub fn on_packet_sent(
        &mut self,
        sent_time: Instant,
        pn: u64,
        bytes: u64,
        bytes_in_flight: u64,
        is_retransmittable: bool,
    ) {
        self.last_sent_packet = pn;
        if !is_retransmittable {
            return;
        }
        self.total_bytes_sent += bytes;

        // the first packet after quiescence re-anchors the send rate
        if bytes_in_flight == 0 {
            self.last_acked_packet_ack_time = Some(sent_time);
            self.last_acked_packet_sent_time = Some(sent_time);
            self.a0_candidates.clear();
            self.a0_candidates.push_back(AckPoint {
                ack_time: sent_time,
                total_bytes_acked: self.total_bytes_acked,
            });
        }

        let state = ConnectionStateOnSentPacket {
            sent_time,
            size: bytes,
            total_bytes_sent_at_last_acked_packet: self.total_bytes_sent_at_last_acked_packet,
            last_acked_packet_sent_time: self.last_acked_packet_sent_time,
            last_acked_packet_ack_time: self.last_acked_packet_ack_time,
            send_time_state: SendTimeState {
                is_app_limited: self.is_app_limited,
                total_bytes_sent: self.total_bytes_sent,
                total_bytes_acked: self.total_bytes_acked,
                total_bytes_lost: self.total_bytes_lost,
                bytes_in_flight: bytes_in_flight + bytes,
            },
        };
        self.connection_state_map
            .insert(pn, Some(state))
            .expect("packet number never overflows");
    }

    /// Process the ack of one packet and produce a sample if the packet
    /// was still tracked.
    pub fn on_packet_acked(&mut self, ack_time: Instant, pn: u64) -> Option<BandwidthSample> {
        let state = self.connection_state_map.get_mut(pn)?.take()?;
        self.total_bytes_acked += state.size;
        self.total_bytes_sent_at_last_acked_packet = state.send_time_state.total_bytes_sent;

        // leaving the app-limited phase once its last packet is acked
        if self.is_app_limited
            && self
                .end_of_app_limited_phase
                .is_some_and(|end| pn > end)
        {
            self.is_app_limited = false;
        }

        let send_rate = match (state.last_acked_packet_sent_time, state.last_acked_packet_ack_time)
        {
            (Some(last_sent), Some(_)) if state.sent_time > last_sent => {
                Bandwidth::from_bytes_and_time_delta(
                    state.send_time_state.total_bytes_sent
                        - state.total_bytes_sent_at_last_acked_packet,
                    state.sent_time.duration_since(last_sent),
                )
            }
            _ => Bandwidth::infinite(),
        };

        let a0 = self.choose_a0_point(state.send_time_state.total_bytes_acked);
        let ack_rate = match a0 {
            Some(a0) if ack_time > a0.ack_time => Bandwidth::from_bytes_and_time_delta(
                self.total_bytes_acked - a0.total_bytes_acked,
                ack_time.duration_since(a0.ack_time),
            ),
            _ => Bandwidth::infinite(),
        };

        self.last_acked_packet_sent_time = Some(state.sent_time);
        self.last_acked_packet_ack_time = Some(ack_time);
        self.a0_candidates.push_back(AckPoint {
            ack_time,
            total_bytes_acked: self.total_bytes_acked,
        });
        if self.a0_candidates.len() > MAX_A0_CANDIDATES {
            self.a0_candidates.pop_front();
        }

        Some(BandwidthSample {
            bandwidth: send_rate.min(ack_rate),
            rtt: ack_time.duration_since(state.sent_time),
            send_rate,
            state_at_send: state.send_time_state,
        })
    }

    /// Pick the newest ack point that was already established when the
    /// acked packet was sent; choosing a newer one would overestimate.
    fn choose_a0_point(&mut self, total_bytes_acked_at_send: u64) -> Option<AckPoint> {
        // drop candidates the acked packet could not have seen anyway,
        // keeping at least one
        while self.a0_candidates.len() > 1
            && self.a0_candidates[1].total_bytes_acked <= total_bytes_acked_at_send
        {
            self.a0_candidates.pop_front();
        }
        self.a0_candidates.front().copied()
    }

    /// The packet was declared lost; its bytes count as lost and its
    /// record is dropped.
    pub fn on_packet_lost(&mut self, pn: u64) -> SendTimeState {
        let state = self.connection_state_map.get_mut(pn).and_then(Option::take);
        match state {
            Some(state) => {
                self.total_bytes_lost += state.size;
                state.send_time_state
            }
            None => SendTimeState::default(),
        }
    }

    /// The packet became unackable (key advance); forget it without
    /// counting it lost.
    pub fn on_packet_neutered(&mut self, pn: u64) {
        if let Some(state) = self.connection_state_map.get_mut(pn).and_then(Option::take) {
            self.total_bytes_neutered += state.size;
        }
    }

    /// Everything below `least_unacked` can no longer produce samples.
    pub fn remove_obsolete_packets(&mut self, least_unacked: u64) {
        while self.connection_state_map.offset() < least_unacked
            && !self.connection_state_map.is_empty()
        {
            self.connection_state_map.pop_front();
        }
    }

    /// Mark the sampler app-limited until the currently last sent packet
    /// is acknowledged.
    pub fn on_app_limited(&mut self) {
        self.is_app_limited = true;
        self.end_of_app_limited_phase = Some(self.last_sent_packet);
    }

    /// Feed the ack-aggregation tracker; returns the extra acked bytes.
    #[allow(clippy::too_many_arguments)]
    pub fn update_ack_aggregation_bytes(
        &mut self,
        bandwidth_estimate: Bandwidth,
        is_new_max_bandwidth: bool,
        round_trip_count: u64,
        last_acked_packet_number: u64,
        ack_time: Instant,
        bytes_acked: u64,
    ) -> u64 {
        self.max_ack_height_tracker.update(
            bandwidth_estimate,
            is_new_max_bandwidth,
            round_trip_count,
            self.last_sent_packet,
            last_acked_packet_number,
            ack_time,
            bytes_acked,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn advance(start: Instant, millis: u64) -> Instant {
        start + Duration::from_millis(millis)
    }

    #[test]
    fn test_steady_rate_sampling() {
        let mut sampler = BandwidthSampler::new(10);
        let start = Instant::now();

        // one 1000-byte packet per 10ms with a 50ms rtt: five in flight,
        // each ack immediately followed by the next send
        let mut in_flight = 0u64;
        for pn in 0..5u64 {
            sampler.on_packet_sent(advance(start, pn * 10), pn, 1000, in_flight, true);
            in_flight += 1000;
        }
        let mut last_sample = None;
        for k in 0..15u64 {
            let now = advance(start, 50 + k * 10);
            last_sample = Some(sampler.on_packet_acked(now, k).unwrap());
            in_flight -= 1000;
            sampler.on_packet_sent(now, k + 5, 1000, in_flight, true);
            in_flight += 1000;
        }
        let sample = last_sample.unwrap();
        assert_eq!(sample.rtt, Duration::from_millis(50));
        // 1000 bytes per 10ms = 800 kbit/s
        assert_eq!(sample.bandwidth.to_bits_per_second(), 800_000);
    }

    #[test]
    fn test_app_limited_phase_ends_at_ack() {
        let mut sampler = BandwidthSampler::new(10);
        let start = Instant::now();
        sampler.on_packet_sent(start, 0, 1000, 0, true);
        sampler.on_app_limited();
        assert!(sampler.is_app_limited());

        sampler.on_packet_sent(advance(start, 10), 1, 1000, 1000, true);
        let sample = sampler.on_packet_acked(advance(start, 50), 0).unwrap();
        // packet 0 was sent before the app-limited mark
        assert!(!sample.state_at_send.is_app_limited);
        assert!(sampler.is_app_limited());

        let sample = sampler.on_packet_acked(advance(start, 60), 1).unwrap();
        assert!(sample.state_at_send.is_app_limited);
        // acking a packet past the phase end exits the phase
        assert!(!sampler.is_app_limited());
    }

    #[test]
    fn test_lost_packets_counted() {
        let mut sampler = BandwidthSampler::new(10);
        let start = Instant::now();
        sampler.on_packet_sent(start, 0, 1000, 0, true);
        sampler.on_packet_sent(start, 1, 1000, 1000, true);
        let state = sampler.on_packet_lost(0);
        assert_eq!(state.total_bytes_sent, 1000);
        assert_eq!(sampler.total_bytes_lost(), 1000);
        // losing it again changes nothing
        sampler.on_packet_lost(0);
        assert_eq!(sampler.total_bytes_lost(), 1000);
    }

    #[test]
    fn test_ack_of_neutered_packet_gives_no_sample() {
        let mut sampler = BandwidthSampler::new(10);
        let start = Instant::now();
        sampler.on_packet_sent(start, 0, 1000, 0, true);
        sampler.on_packet_neutered(0);
        assert!(sampler.on_packet_acked(advance(start, 50), 0).is_none());
    }

    #[test]
    fn test_ack_aggregation_epochs() {
        let mut tracker = MaxAckHeightTracker::new(10);
        let start = Instant::now();
        let rate = Bandwidth::from_bytes_per_second(100_000);

        // the first update opens an epoch
        assert_eq!(tracker.update(rate, false, 1, 10, 1, start, 1000), 0);
        // acks arriving much faster than the estimate stay in the epoch
        // and surface the aggregated excess
        let extra = tracker.update(
            rate,
            false,
            1,
            10,
            2,
            start + Duration::from_millis(1),
            2000,
        );
        // expected in 1ms is only 100 bytes; 3000 arrived
        assert_eq!(extra, 2900);
        assert_eq!(tracker.get(), 2900);
        assert_eq!(tracker.num_ack_aggregation_epochs(), 1);

        // a slow ack lets the arrival rate sag below the estimate,
        // closing the epoch
        assert_eq!(
            tracker.update(rate, false, 2, 10, 3, start + Duration::from_secs(1), 500),
            0
        );
        assert_eq!(tracker.num_ack_aggregation_epochs(), 2);
    }
}
