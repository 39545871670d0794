use std::time::Duration;

use tokio::time::Instant;

use crate::{
    Acked, Lost, SendAlgorithm, DEFAULT_MSS,
    bandwidth::Bandwidth,
    minmax::WindowedMaxFilter,
    rtt::RttEstimator,
    sampler::BandwidthSampler,
};

/// Tunables of the BBR2 model, frozen at construction.
#[derive(Debug, Clone, Copy)]
pub struct Bbr2Params {
    /// Rounds the max-bandwidth filter looks back.
    pub bandwidth_window: u64,
    /// Rounds the extra-acked filter looks back.
    pub max_ack_height_window: u64,
    /// STARTUP exits after this many rounds without bandwidth growth.
    pub startup_full_bw_rounds: u64,
    /// Growth below this factor does not count as growth.
    pub startup_full_bw_threshold: f64,
    /// Loss events per round before inflight is deemed too high.
    pub startup_full_loss_count: u64,
    pub probe_bw_full_loss_count: u64,
    /// Share of inflight lost in a round that signals overshoot.
    pub loss_threshold: f64,
    /// Decay factor of bandwidth_lo per lossy round.
    pub beta: f64,
    /// STARTUP also exits after this many rounds with a standing queue.
    pub max_startup_queue_rounds: u64,
    /// min_rtt is considered stale after this long.
    pub min_rtt_expiry: Duration,
    pub startup_pacing_gain: f64,
    pub startup_cwnd_gain: f64,
    pub drain_pacing_gain: f64,
    pub probe_bw_cwnd_gain: f64,
}

impl Default for Bbr2Params {
    fn default() -> Self {
        Self {
            bandwidth_window: 10,
            max_ack_height_window: 10,
            startup_full_bw_rounds: 3,
            startup_full_bw_threshold: 1.25,
            startup_full_loss_count: 8,
            probe_bw_full_loss_count: 2,
            loss_threshold: 0.02,
            beta: 0.3,
            max_startup_queue_rounds: 2,
            min_rtt_expiry: Duration::from_secs(10),
            startup_pacing_gain: 2.885,
            startup_cwnd_gain: 2.885,
            drain_pacing_gain: 1.0 / 2.885,
            probe_bw_cwnd_gain: 2.0,
        }
    }
}

/// Counts round trips: a round ends when a packet sent after the last
/// round's end is acknowledged.
#[derive(Debug, Default)]
struct RoundTripCounter {
    round_trip_count: u64,
    last_sent_packet: u64,
    end_of_round_trip: Option<u64>,
}

impl RoundTripCounter {
    fn on_packet_sent(&mut self, pn: u64) {
        self.last_sent_packet = pn;
    }

    /// Returns whether `acked_pn` starts a new round.
    fn on_packet_acked(&mut self, acked_pn: u64) -> bool {
        match self.end_of_round_trip {
            Some(end) if acked_pn <= end => false,
            _ => {
                self.round_trip_count += 1;
                self.end_of_round_trip = Some(self.last_sent_packet);
                true
            }
        }
    }
}

/// The BBR2 model of the network: bandwidth and round-trip filters, the
/// short-term `_lo` bounds, the `inflight_hi` overshoot bound, and the
/// per-round loss accounting the mode logic reads.
#[derive(Debug)]
pub struct Bbr2NetworkModel {
    params: Bbr2Params,
    sampler: BandwidthSampler,
    round: RoundTripCounter,

    max_bandwidth_filter: WindowedMaxFilter<Bandwidth>,
    min_rtt: Option<Duration>,
    min_rtt_timestamp: Option<Instant>,

    /// Largest bandwidth sample of the current round.
    bandwidth_latest: Bandwidth,
    /// Largest delivered-inflight sample of the current round.
    inflight_latest: u64,
    bandwidth_lo: Option<Bandwidth>,
    inflight_lo: Option<u64>,
    inflight_hi: Option<u64>,

    bytes_lost_in_round: u64,
    loss_events_in_round: u64,
    max_bytes_delivered_in_round: u64,
    min_bytes_in_flight_in_round: u64,

    full_bandwidth_reached: bool,
    full_bandwidth_baseline: Bandwidth,
    rounds_without_bandwidth_growth: u64,
    rounds_with_queueing: u64,
}

impl Bbr2NetworkModel {
    pub fn new(params: Bbr2Params) -> Self {
        Self {
            sampler: BandwidthSampler::new(params.max_ack_height_window),
            round: RoundTripCounter::default(),
            max_bandwidth_filter: WindowedMaxFilter::new(params.bandwidth_window),
            min_rtt: None,
            min_rtt_timestamp: None,
            bandwidth_latest: Bandwidth::ZERO,
            inflight_latest: 0,
            bandwidth_lo: None,
            inflight_lo: None,
            inflight_hi: None,
            bytes_lost_in_round: 0,
            loss_events_in_round: 0,
            max_bytes_delivered_in_round: 0,
            min_bytes_in_flight_in_round: u64::MAX,
            full_bandwidth_reached: false,
            full_bandwidth_baseline: Bandwidth::ZERO,
            rounds_without_bandwidth_growth: 0,
            rounds_with_queueing: 0,
            params,
        }
    }

    pub fn round_trip_count(&self) -> u64 {
        self.round.round_trip_count
    }

    pub fn max_bandwidth(&self) -> Bandwidth {
        self.max_bandwidth_filter.get()
    }

    /// The bandwidth the rest of the controller should use:
    /// min(max filter, bandwidth_lo).
    pub fn bandwidth_estimate(&self) -> Bandwidth {
        match self.bandwidth_lo {
            Some(lo) => self.max_bandwidth().min(lo),
            None => self.max_bandwidth(),
        }
    }

    pub fn min_rtt(&self) -> Option<Duration> {
        self.min_rtt
    }

    pub fn min_rtt_timestamp(&self) -> Option<Instant> {
        self.min_rtt_timestamp
    }

    pub fn inflight_hi(&self) -> u64 {
        self.inflight_hi.unwrap_or(u64::MAX)
    }

    pub fn inflight_lo(&self) -> u64 {
        self.inflight_lo.unwrap_or(u64::MAX)
    }

    pub fn set_inflight_hi(&mut self, value: u64) {
        self.inflight_hi = Some(value);
    }

    pub fn clear_inflight_hi(&mut self) {
        self.inflight_hi = None;
    }

    pub fn full_bandwidth_reached(&self) -> bool {
        self.full_bandwidth_reached
    }

    pub fn max_ack_height(&self) -> u64 {
        self.sampler.max_ack_height()
    }

    pub fn is_app_limited(&self) -> bool {
        self.sampler.is_app_limited()
    }

    /// The largest single acknowledgment of the current round.
    pub fn max_bytes_delivered_in_round(&self) -> u64 {
        self.max_bytes_delivered_in_round
    }

    /// Bandwidth-delay product at the current estimate.
    pub fn bdp(&self) -> u64 {
        self.bdp_with(self.bandwidth_estimate())
    }

    pub fn bdp_with(&self, bandwidth: Bandwidth) -> u64 {
        match self.min_rtt {
            Some(min_rtt) => bandwidth.bytes_per_period(min_rtt),
            None => 0,
        }
    }

    pub fn on_packet_sent(
        &mut self,
        sent_time: Instant,
        pn: u64,
        bytes: u64,
        bytes_in_flight: u64,
        is_retransmittable: bool,
    ) {
        self.round.on_packet_sent(pn);
        self.sampler
            .on_packet_sent(sent_time, pn, bytes, bytes_in_flight, is_retransmittable);
    }

    pub fn on_app_limited(&mut self) {
        self.sampler.on_app_limited();
    }

    /// Digest one congestion event. Returns whether a new round started.
    pub fn on_congestion_event(
        &mut self,
        event_time: Instant,
        acked_packets: &[Acked],
        lost_packets: &[Lost],
        bytes_in_flight: u64,
    ) -> bool {
        let mut round_started = false;
        let mut bytes_acked = 0u64;
        let mut last_acked_pn = 0u64;
        let mut is_new_max_bandwidth = false;

        for lost in lost_packets {
            if lost.spurious {
                continue;
            }
            self.sampler.on_packet_lost(lost.pn);
            self.bytes_lost_in_round += lost.bytes;
        }
        if lost_packets.iter().any(|lost| !lost.spurious) {
            self.loss_events_in_round += 1;
        }

        for acked in acked_packets {
            let Some(sample) = self.sampler.on_packet_acked(event_time, acked.pn) else {
                continue;
            };
            bytes_acked += acked.bytes;
            last_acked_pn = last_acked_pn.max(acked.pn);
            round_started |= self.round.on_packet_acked(acked.pn);

            // min_rtt always adopts a smaller sample, and a stale one is
            // replaced even by a larger sample
            let stale = self
                .min_rtt_timestamp
                .is_some_and(|at| event_time.duration_since(at) > self.params.min_rtt_expiry);
            if self.min_rtt.is_none() || stale || Some(sample.rtt) < self.min_rtt {
                self.min_rtt = Some(sample.rtt);
                self.min_rtt_timestamp = Some(event_time);
            }

            if !sample.state_at_send.is_app_limited
                || sample.bandwidth > self.max_bandwidth()
            {
                if sample.bandwidth > self.max_bandwidth() {
                    is_new_max_bandwidth = true;
                }
                self.max_bandwidth_filter
                    .update(sample.bandwidth, self.round.round_trip_count);
            }

            // per-round latest measurements, reset at round start
            if round_started {
                self.bandwidth_latest = sample.bandwidth;
                self.inflight_latest = sample.state_at_send.bytes_in_flight;
            } else {
                self.bandwidth_latest = self.bandwidth_latest.max(sample.bandwidth);
                self.inflight_latest =
                    self.inflight_latest.max(sample.state_at_send.bytes_in_flight);
            }
            self.max_bytes_delivered_in_round =
                self.max_bytes_delivered_in_round.max(acked.bytes);
        }

        self.min_bytes_in_flight_in_round =
            self.min_bytes_in_flight_in_round.min(bytes_in_flight);

        if bytes_acked > 0 {
            self.sampler.update_ack_aggregation_bytes(
                self.max_bandwidth(),
                is_new_max_bandwidth,
                self.round.round_trip_count,
                last_acked_pn,
                event_time,
                bytes_acked,
            );
        }
        round_started
    }

    /// End-of-round decay of the short-term lower bounds when the round
    /// saw loss; they recover as soon as fresh samples beat them.
    pub fn adapt_lower_bounds(&mut self) {
        if self.bytes_lost_in_round == 0 {
            return;
        }
        let lo = self.bandwidth_lo.unwrap_or_else(|| self.max_bandwidth());
        let decayed = lo.scale(1.0 - self.params.beta);
        self.bandwidth_lo = Some(self.bandwidth_latest.max(decayed));

        let inflight_lo = self.inflight_lo.unwrap_or(u64::MAX);
        let decayed = if inflight_lo == u64::MAX {
            u64::MAX
        } else {
            (inflight_lo as f64 * (1.0 - self.params.beta)) as u64
        };
        self.inflight_lo = Some(self.inflight_latest.max(decayed.min(inflight_lo)));
    }

    pub fn clear_lower_bounds(&mut self) {
        self.bandwidth_lo = None;
        self.inflight_lo = None;
    }

    /// Whether the loss this round says the inflight at send was too much.
    pub fn is_inflight_too_high(&self, max_loss_events: u64) -> bool {
        self.loss_events_in_round >= max_loss_events
            && self.bytes_lost_in_round as f64
                > self.inflight_latest as f64 * self.params.loss_threshold
    }

    /// STARTUP gate: did max_bandwidth grow enough lately?
    /// Must be called once per round while in STARTUP.
    pub fn check_bandwidth_growth(&mut self) {
        if self.full_bandwidth_reached || self.is_app_limited() {
            return;
        }
        let threshold = self
            .full_bandwidth_baseline
            .scale(self.params.startup_full_bw_threshold);
        if self.max_bandwidth() > threshold {
            self.full_bandwidth_baseline = self.max_bandwidth();
            self.rounds_without_bandwidth_growth = 0;
            return;
        }
        self.rounds_without_bandwidth_growth += 1;
        if self.rounds_without_bandwidth_growth >= self.params.startup_full_bw_rounds {
            self.full_bandwidth_reached = true;
            tracing::debug!(
                bandwidth = %self.max_bandwidth(),
                "startup exits: bandwidth plateaued"
            );
        }
    }

    /// STARTUP also ends when a standing queue persists: the minimum
    /// inflight of the round never drained near the BDP.
    pub fn check_persistent_queue(&mut self, target_gain: f64) {
        if self.full_bandwidth_reached || self.min_bytes_in_flight_in_round == u64::MAX {
            return;
        }
        let bdp = self.bdp();
        if bdp == 0 {
            return;
        }
        let threshold = ((target_gain * bdp as f64) as u64).max(bdp + self.max_ack_height());
        if self.min_bytes_in_flight_in_round >= threshold {
            self.rounds_with_queueing += 1;
        } else {
            self.rounds_with_queueing = 0;
        }
        if self.rounds_with_queueing >= self.params.max_startup_queue_rounds {
            self.full_bandwidth_reached = true;
            tracing::debug!("startup exits: persistent queue");
        }
    }

    /// Reset the per-round accounting; call at each round start after the
    /// mode logic has consumed the counters.
    pub fn on_new_round(&mut self) {
        self.bytes_lost_in_round = 0;
        self.loss_events_in_round = 0;
        self.max_bytes_delivered_in_round = 0;
        self.min_bytes_in_flight_in_round = u64::MAX;
    }

    pub fn remove_obsolete_packets(&mut self, least_unacked: u64) {
        self.sampler.remove_obsolete_packets(least_unacked);
    }

    pub fn on_packet_neutered(&mut self, pn: u64) {
        self.sampler.on_packet_neutered(pn);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Startup,
    Drain,
    ProbeBw,
    ProbeRtt,
}

const PACING_GAIN_CYCLE: [f64; 8] = [1.25, 0.75, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
const PROBE_RTT_DURATION: Duration = Duration::from_millis(200);

/// A BBR2-flavoured controller over [`Bbr2NetworkModel`]: model-driven
/// Startup/Drain/ProbeBw/ProbeRtt with the cyclic pacing gain.
#[derive(Debug)]
pub struct Bbr2Controller {
    model: Bbr2NetworkModel,
    params: Bbr2Params,
    mode: Mode,

    cwnd: u64,
    initial_cwnd: u64,
    min_cwnd: u64,
    pacing_gain: f64,
    cwnd_gain: f64,

    cycle_offset: usize,
    last_cycle_start: Option<Instant>,
    exit_probe_rtt_at: Option<Instant>,
}

impl Bbr2Controller {
    pub fn new(initial_window_packets: u64, params: Bbr2Params) -> Self {
        let initial_cwnd = initial_window_packets * DEFAULT_MSS;
        Self {
            model: Bbr2NetworkModel::new(params),
            mode: Mode::Startup,
            cwnd: initial_cwnd,
            initial_cwnd,
            min_cwnd: 4 * DEFAULT_MSS,
            pacing_gain: params.startup_pacing_gain,
            cwnd_gain: params.startup_cwnd_gain,
            cycle_offset: 0,
            last_cycle_start: None,
            exit_probe_rtt_at: None,
            params,
        }
    }

    pub fn model(&self) -> &Bbr2NetworkModel {
        &self.model
    }

    fn enter_drain(&mut self) {
        self.mode = Mode::Drain;
        self.pacing_gain = self.params.drain_pacing_gain;
        self.cwnd_gain = self.params.startup_cwnd_gain;
    }

    fn enter_probe_bw(&mut self, now: Instant) {
        self.mode = Mode::ProbeBw;
        self.cwnd_gain = self.params.probe_bw_cwnd_gain;
        // start somewhere random but never in the drain-phase slot
        let mut index = rand::random_range(0..PACING_GAIN_CYCLE.len() as u32 - 1) as usize;
        if index >= 1 {
            index += 1;
        }
        self.cycle_offset = index;
        self.pacing_gain = PACING_GAIN_CYCLE[self.cycle_offset];
        self.last_cycle_start = Some(now);
    }

    fn enter_probe_rtt(&mut self) {
        self.mode = Mode::ProbeRtt;
        self.pacing_gain = 1.0;
        self.exit_probe_rtt_at = None;
    }

    fn update_probe_bw_cycle(&mut self, now: Instant) {
        let min_rtt = self.model.min_rtt().unwrap_or(crate::rtt::INITIAL_RTT);
        let advance = self
            .last_cycle_start
            .map_or(true, |start| now.duration_since(start) > min_rtt);
        if advance {
            self.cycle_offset = (self.cycle_offset + 1) % PACING_GAIN_CYCLE.len();
            self.last_cycle_start = Some(now);
            self.pacing_gain = PACING_GAIN_CYCLE[self.cycle_offset];
        }
    }

    fn maybe_enter_probe_rtt(&mut self, now: Instant) {
        if self.mode == Mode::ProbeRtt {
            return;
        }
        let stale = self
            .model
            .min_rtt_timestamp()
            .is_some_and(|at| now.duration_since(at) > self.params.min_rtt_expiry);
        if stale {
            self.enter_probe_rtt();
        }
    }

    fn update_congestion_window(&mut self, bytes_acked: u64) {
        let bdp = self.model.bdp();
        let target = if bdp > 0 {
            ((bdp as f64 * self.cwnd_gain) as u64 + self.model.max_ack_height())
                .max(self.initial_cwnd.min(self.cwnd))
        } else {
            self.initial_cwnd
        };
        let bounded = target
            .min(self.model.inflight_hi())
            .min(self.model.inflight_lo());

        self.cwnd = match self.mode {
            Mode::Startup => {
                if self.model.full_bandwidth_reached() {
                    bounded.min(self.cwnd + bytes_acked)
                } else {
                    self.cwnd + bytes_acked
                }
            }
            Mode::Drain => bounded,
            Mode::ProbeBw | Mode::ProbeRtt => bounded.min(self.cwnd + bytes_acked),
        }
        .max(self.min_cwnd);
    }

    fn probe_rtt_cwnd(&self) -> u64 {
        self.min_cwnd
    }
}

impl SendAlgorithm for Bbr2Controller {
    fn congestion_window(&self) -> u64 {
        if self.mode == Mode::ProbeRtt {
            self.probe_rtt_cwnd()
        } else {
            self.cwnd
        }
    }

    fn can_send(&self, bytes_in_flight: u64) -> bool {
        bytes_in_flight < self.congestion_window()
    }

    fn on_packet_sent(
        &mut self,
        sent_time: Instant,
        bytes_in_flight: u64,
        pn: u64,
        bytes: u64,
        is_retransmittable: bool,
    ) {
        self.model
            .on_packet_sent(sent_time, pn, bytes, bytes_in_flight, is_retransmittable);
    }

    fn on_congestion_event(
        &mut self,
        _rtt_updated: bool,
        prior_in_flight: u64,
        event_time: Instant,
        acked_packets: &[Acked],
        lost_packets: &[Lost],
        _rtt: &RttEstimator,
    ) {
        let bytes_acked: u64 = acked_packets.iter().map(|acked| acked.bytes).sum();
        let in_flight_after = prior_in_flight
            .saturating_sub(bytes_acked)
            .saturating_sub(lost_packets.iter().map(|lost| lost.bytes).sum());
        let round_started =
            self.model
                .on_congestion_event(event_time, acked_packets, lost_packets, in_flight_after);

        match self.mode {
            Mode::Startup => {
                if round_started {
                    self.model.check_bandwidth_growth();
                    self.model.check_persistent_queue(self.params.startup_full_bw_threshold);
                }
                if self
                    .model
                    .is_inflight_too_high(self.params.startup_full_loss_count)
                {
                    // overshoot: remember the ceiling we just found
                    self.model.set_inflight_hi(self.model.inflight_latest);
                }
                if self.model.full_bandwidth_reached() {
                    self.enter_drain();
                }
            }
            Mode::Drain => {
                if in_flight_after <= self.model.bdp() {
                    self.enter_probe_bw(event_time);
                }
            }
            Mode::ProbeBw => {
                if round_started {
                    self.model.adapt_lower_bounds();
                    if self
                        .model
                        .is_inflight_too_high(self.params.probe_bw_full_loss_count)
                    {
                        self.model.set_inflight_hi(self.model.inflight_latest);
                    }
                }
                self.update_probe_bw_cycle(event_time);
            }
            Mode::ProbeRtt => {
                if self.exit_probe_rtt_at.is_none() {
                    if in_flight_after <= self.probe_rtt_cwnd() + DEFAULT_MSS {
                        self.exit_probe_rtt_at = Some(event_time + PROBE_RTT_DURATION);
                    }
                } else if self.exit_probe_rtt_at.is_some_and(|at| event_time >= at) {
                    self.model.clear_lower_bounds();
                    if self.model.full_bandwidth_reached() {
                        self.enter_probe_bw(event_time);
                    } else {
                        self.mode = Mode::Startup;
                        self.pacing_gain = self.params.startup_pacing_gain;
                        self.cwnd_gain = self.params.startup_cwnd_gain;
                    }
                }
            }
        }

        if round_started {
            self.model.on_new_round();
        }
        self.maybe_enter_probe_rtt(event_time);
        self.update_congestion_window(bytes_acked);
    }

    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool) {
        if packets_retransmitted {
            // the model keeps its estimates, only the window collapses
            self.cwnd = self.min_cwnd;
        }
    }

    fn on_application_limited(&mut self, _bytes_in_flight: u64) {
        self.model.on_app_limited();
    }

    fn pacing_rate(&self, _bytes_in_flight: u64) -> Bandwidth {
        let bandwidth = self.model.bandwidth_estimate();
        if bandwidth.is_zero() {
            // before any sample, pace off the initial window and rtt
            return Bandwidth::from_bytes_and_time_delta(
                self.initial_cwnd,
                crate::rtt::INITIAL_RTT,
            )
            .scale(self.pacing_gain);
        }
        bandwidth.scale(self.pacing_gain)
    }

    fn bandwidth_estimate(&self) -> Bandwidth {
        self.model.bandwidth_estimate()
    }

    fn in_recovery(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acked(pn: u64, bytes: u64, sent: Instant, now: Instant) -> Acked {
        Acked {
            pn,
            bytes,
            sent_time: sent,
            event_time: now,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_counter() {
        let mut counter = RoundTripCounter::default();
        counter.on_packet_sent(1);
        counter.on_packet_sent(2);
        assert!(counter.on_packet_acked(1));
        assert_eq!(counter.round_trip_count, 1);
        // acks up to the round end stay in the round
        assert!(!counter.on_packet_acked(2));
        counter.on_packet_sent(3);
        assert!(counter.on_packet_acked(3));
        assert_eq!(counter.round_trip_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_exits_on_plateau() {
        let params = Bbr2Params::default();
        let mut model = Bbr2NetworkModel::new(params);
        let start = Instant::now();

        // identical bandwidth round after round
        let mut pn = 0u64;
        for round in 0..6u64 {
            let sent = start + Duration::from_millis(round * 100);
            let now = sent + Duration::from_millis(50);
            model.on_packet_sent(sent, pn, 10_000, 0, true);
            let round_started =
                model.on_congestion_event(now, &[acked(pn, 10_000, sent, now)], &[], 0);
            assert!(round_started);
            model.check_bandwidth_growth();
            model.on_new_round();
            pn += 1;
        }
        assert!(model.full_bandwidth_reached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inflight_too_high_needs_enough_loss() {
        let params = Bbr2Params::default();
        let mut model = Bbr2NetworkModel::new(params);
        let start = Instant::now();

        model.on_packet_sent(start, 0, 50_000, 0, true);
        model.on_packet_sent(start, 1, 1000, 50_000, true);
        let now = start + Duration::from_millis(50);
        model.on_congestion_event(
            now,
            &[acked(0, 50_000, start, now)],
            &[Lost {
                pn: 1,
                bytes: 1000,
                sent_time: start,
                spurious: false,
            }],
            0,
        );
        // a single loss event is below the probe-bw threshold of two
        assert!(!model.is_inflight_too_high(2));
        assert!(model.is_inflight_too_high(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lower_bounds_decay_only_on_loss() {
        let params = Bbr2Params::default();
        let mut model = Bbr2NetworkModel::new(params);
        model.adapt_lower_bounds();
        assert!(model.bandwidth_lo.is_none());

        model.bytes_lost_in_round = 1;
        model.max_bandwidth_filter.reset(
            Bandwidth::from_kbits_per_second(1000),
            0,
        );
        model.adapt_lower_bounds();
        let lo = model.bandwidth_lo.unwrap();
        assert_eq!(lo, Bandwidth::from_kbits_per_second(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_startup_grows_cwnd_by_acked() {
        let mut controller = Bbr2Controller::new(10, Bbr2Params::default());
        let rtt = RttEstimator::default();
        let start = Instant::now();
        let before = controller.congestion_window();

        controller.on_packet_sent(start, 0, 0, 10_000, true);
        let now = start + Duration::from_millis(50);
        controller.on_congestion_event(
            true,
            10_000,
            now,
            &[acked(0, 10_000, start, now)],
            &[],
            &rtt,
        );
        assert_eq!(controller.congestion_window(), before + 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_rtt_window_is_minimal() {
        let mut controller = Bbr2Controller::new(10, Bbr2Params::default());
        controller.mode = Mode::ProbeRtt;
        assert_eq!(controller.congestion_window(), 4 * DEFAULT_MSS);
    }
}
