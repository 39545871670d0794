use std::time::Duration;

use tokio::time::Instant;

use crate::{
    Acked, Lost, SendAlgorithm, bandwidth::Bandwidth, rtt::RttEstimator, DEFAULT_MSS,
};

// Constants in 2^10 fractions of a second instead of ms, to allow a
// 10-bit shift right to divide.
const CUBE_SCALE: u32 = 40; // 1024*1024^3; the first 1024 is from 0.100^3,
                            // where 0.100 is the 100 ms scaling round trip time
const CUBE_CWND_SCALE: u64 = 410;
const CUBE_FACTOR: u64 = (1u64 << CUBE_SCALE) / CUBE_CWND_SCALE;

const DEFAULT_NUM_CONNECTIONS: u32 = 2;
const BETA: f32 = 0.7; // default backoff factor
// Additional backoff factor when loss occurs in the concave part of the
// cubic curve, ceding bandwidth to new concurrent flows and speeding up
// convergence.
const BETA_LAST_MAX: f32 = 0.85;

// Cubic is "independent" of RTT; updates are limited to this interval.
const MAX_CUBIC_TIME_INTERVAL: Duration = Duration::from_millis(30);

/// The window arithmetic of "CUBIC for Fast Long-Distance Networks",
/// operating on packet counts with the N-connection emulation of the
/// original QUIC deployment.
#[derive(Debug)]
pub struct Cubic {
    num_connections: u32,
    epoch: Option<Instant>,
    last_update_time: Option<Instant>,
    last_congestion_window: u64,
    last_max_congestion_window: u64,
    acked_packets_count: u64,
    epoch_packets_count: u64,
    estimated_tcp_congestion_window: u64,
    origin_point_congestion_window: u64,
    time_to_origin_point: u64,
    last_target_congestion_window: u64,
}

impl Default for Cubic {
    fn default() -> Self {
        Self {
            num_connections: DEFAULT_NUM_CONNECTIONS,
            epoch: None,
            last_update_time: None,
            last_congestion_window: 0,
            last_max_congestion_window: 0,
            acked_packets_count: 0,
            epoch_packets_count: 0,
            estimated_tcp_congestion_window: 0,
            origin_point_congestion_window: 0,
            time_to_origin_point: 0,
            last_target_congestion_window: 0,
        }
    }
}

impl Cubic {
    pub fn set_num_connections(&mut self, num_connections: u32) {
        self.num_connections = num_connections;
    }

    /// The TCP-friendly alpha from Section 3.3 of the CUBIC paper, derived
    /// for an N-connection emulation. Beta here is a cwnd multiplier,
    /// 1 - beta from the paper.
    fn alpha(&self) -> f32 {
        let beta = self.beta();
        3.0 * self.num_connections as f32 * self.num_connections as f32 * (1.0 - beta)
            / (1.0 + beta)
    }

    /// The effective backoff multiplier of an ensemble of N TCP-Reno
    /// connections on a single loss event.
    fn beta(&self) -> f32 {
        (self.num_connections as f32 - 1.0 + BETA) / self.num_connections as f32
    }

    fn beta_last_max(&self) -> f32 {
        (self.num_connections as f32 - 1.0 + BETA_LAST_MAX) / self.num_connections as f32
    }

    pub fn reset(&mut self) {
        *self = Self {
            num_connections: self.num_connections,
            ..Self::default()
        };
    }

    /// When the sender is not using the available window the cubic curve
    /// must not keep growing; restart the epoch on the next ack.
    pub fn on_application_limited(&mut self) {
        self.epoch = None;
    }

    /// The window to use after a loss event, in packets.
    pub fn congestion_window_after_packet_loss(&mut self, current_congestion_window: u64) -> u64 {
        if current_congestion_window < self.last_max_congestion_window {
            // We never reached the old max, so assume we are competing with
            // another flow and give it room.
            self.last_max_congestion_window =
                (self.beta_last_max() * current_congestion_window as f32) as u64;
        } else {
            self.last_max_congestion_window = current_congestion_window;
        }
        self.epoch = None;
        (current_congestion_window as f32 * self.beta()) as u64
    }

    /// The window to use after an ack, in packets.
    pub fn congestion_window_after_ack(
        &mut self,
        current_congestion_window: u64,
        delay_min: Duration,
        event_time: Instant,
    ) -> u64 {
        self.acked_packets_count += 1;
        self.epoch_packets_count += 1;
        if self.last_congestion_window == current_congestion_window
            && self
                .last_update_time
                .is_some_and(|last| event_time.duration_since(last) <= MAX_CUBIC_TIME_INTERVAL)
        {
            return self
                .last_target_congestion_window
                .max(self.estimated_tcp_congestion_window);
        }
        self.last_congestion_window = current_congestion_window;
        self.last_update_time = Some(event_time);

        let epoch = match self.epoch {
            Some(epoch) => epoch,
            None => {
                // First ack after a loss event.
                self.acked_packets_count = 1;
                self.epoch_packets_count = 1;
                self.estimated_tcp_congestion_window = current_congestion_window;
                if self.last_max_congestion_window <= current_congestion_window {
                    self.time_to_origin_point = 0;
                    self.origin_point_congestion_window = current_congestion_window;
                } else {
                    self.time_to_origin_point = ((CUBE_FACTOR
                        * (self.last_max_congestion_window - current_congestion_window))
                        as f64)
                        .cbrt() as u64;
                    self.origin_point_congestion_window = self.last_max_congestion_window;
                }
                self.epoch = Some(event_time);
                event_time
            }
        };

        // Elapsed time in 2^10 fractions of a second, shifted so the cube
        // scale divides by shift.
        let elapsed_time = (((event_time + delay_min).duration_since(epoch).as_micros() as u64)
            << 10)
            / 1_000_000;
        let offset = self.time_to_origin_point.abs_diff(elapsed_time);
        let delta_congestion_window =
            CUBE_CWND_SCALE.saturating_mul(offset * offset * offset) >> CUBE_SCALE;

        let add_delta = elapsed_time > self.time_to_origin_point;
        let mut target_congestion_window = if add_delta {
            self.origin_point_congestion_window + delta_congestion_window
        } else {
            self.origin_point_congestion_window - delta_congestion_window
        };
        // Limit the increase to half the acked packets, rounded up.
        target_congestion_window = target_congestion_window
            .min(current_congestion_window + (self.epoch_packets_count + 1) / 2);

        debug_assert!(self.estimated_tcp_congestion_window > 0);
        // Update the estimated TCP window for TCP friendliness. With a
        // dynamic alpha the required count can drop suddenly, hence a loop.
        loop {
            let required_ack_count =
                (self.estimated_tcp_congestion_window as f32 / self.alpha()) as u64;
            if self.acked_packets_count < required_ack_count {
                break;
            }
            self.acked_packets_count -= required_ack_count;
            self.estimated_tcp_congestion_window += 1;
        }
        self.epoch_packets_count = 0;

        self.last_target_congestion_window = target_congestion_window;
        target_congestion_window.max(self.estimated_tcp_congestion_window)
    }
}

/// A classic loss-based controller: slow start, CUBIC congestion
/// avoidance and a once-per-round recovery cutback. Windows are bytes;
/// the cubic arithmetic runs in packets.
#[derive(Debug)]
pub struct CubicController {
    cubic: Cubic,
    congestion_window: u64,
    min_congestion_window: u64,
    slowstart_threshold: u64,
    /// No further cutback until a packet sent after this one is acked.
    largest_sent_at_last_cutback: Option<u64>,
    largest_sent_packet: u64,
    largest_acked_packet: Option<u64>,
    num_acked_packets: u64,
    cached_srtt: Option<Duration>,
    mss: u64,
}

impl CubicController {
    pub fn new(initial_window_packets: u64) -> Self {
        Self {
            cubic: Cubic::default(),
            congestion_window: initial_window_packets * DEFAULT_MSS,
            min_congestion_window: 2 * DEFAULT_MSS,
            slowstart_threshold: u64::MAX,
            largest_sent_at_last_cutback: None,
            largest_sent_packet: 0,
            largest_acked_packet: None,
            num_acked_packets: 0,
            cached_srtt: None,
            mss: DEFAULT_MSS,
        }
    }

    fn in_slow_start(&self) -> bool {
        self.congestion_window < self.slowstart_threshold
    }

    fn on_packet_lost(&mut self, lost: &Lost) {
        if self
            .largest_sent_at_last_cutback
            .is_some_and(|cutback| lost.pn <= cutback)
        {
            // already reacted to a loss in this round
            return;
        }
        tracing::debug!(pn = lost.pn, cwnd = self.congestion_window, "loss cutback");
        let cwnd_packets = self.congestion_window / self.mss;
        self.congestion_window = self
            .cubic
            .congestion_window_after_packet_loss(cwnd_packets)
            .saturating_mul(self.mss)
            .max(self.min_congestion_window);
        self.slowstart_threshold = self.congestion_window;
        self.largest_sent_at_last_cutback = Some(self.largest_sent_packet);
        self.num_acked_packets = 0;
    }

    fn on_packet_acked(&mut self, acked: &Acked, rtt: &RttEstimator, event_time: Instant) {
        self.largest_acked_packet = Some(
            self.largest_acked_packet
                .map_or(acked.pn, |largest| largest.max(acked.pn)),
        );
        if self.in_recovery_internal() {
            // growing the window during recovery would outrun the cutback
            return;
        }
        if self.in_slow_start() {
            self.congestion_window += self.mss;
            return;
        }
        let cwnd_packets = self.congestion_window / self.mss;
        self.congestion_window = self
            .cubic
            .congestion_window_after_ack(cwnd_packets, rtt.min_rtt(), event_time)
            .saturating_mul(self.mss);
    }

    fn in_recovery_internal(&self) -> bool {
        match (self.largest_acked_packet, self.largest_sent_at_last_cutback) {
            (Some(acked), Some(cutback)) => acked <= cutback,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

impl SendAlgorithm for CubicController {
    fn congestion_window(&self) -> u64 {
        self.congestion_window
    }

    fn can_send(&self, bytes_in_flight: u64) -> bool {
        bytes_in_flight < self.congestion_window
    }

    fn on_packet_sent(
        &mut self,
        _sent_time: Instant,
        _bytes_in_flight: u64,
        pn: u64,
        _bytes: u64,
        is_retransmittable: bool,
    ) {
        if is_retransmittable {
            self.largest_sent_packet = pn;
        }
    }

    fn on_congestion_event(
        &mut self,
        _rtt_updated: bool,
        prior_in_flight: u64,
        event_time: Instant,
        acked_packets: &[Acked],
        lost_packets: &[Lost],
        rtt: &RttEstimator,
    ) {
        self.cached_srtt = Some(rtt.smoothed_rtt());
        for lost in lost_packets {
            if !lost.spurious {
                self.on_packet_lost(lost);
            }
        }
        // an underused window must not grow the cubic curve
        if prior_in_flight < self.congestion_window {
            self.cubic.on_application_limited();
        }
        for acked in acked_packets {
            self.on_packet_acked(acked, rtt, event_time);
        }
    }

    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool) {
        if !packets_retransmitted {
            return;
        }
        self.cubic.reset();
        self.slowstart_threshold = self.congestion_window / 2;
        self.congestion_window = self.min_congestion_window;
        self.largest_sent_at_last_cutback = None;
    }

    fn on_application_limited(&mut self, _bytes_in_flight: u64) {
        self.cubic.on_application_limited();
    }

    fn pacing_rate(&self, _bytes_in_flight: u64) -> Bandwidth {
        // pace slightly above the window rate; more aggressively during
        // slow start where the window doubles per round
        let base = self.bandwidth_estimate();
        if self.in_slow_start() {
            base.scale(2.0)
        } else {
            base.scale(1.25)
        }
    }

    fn bandwidth_estimate(&self) -> Bandwidth {
        Bandwidth::from_bytes_and_time_delta(
            self.congestion_window,
            self.cached_srtt.unwrap_or(crate::rtt::INITIAL_RTT),
        )
    }

    fn in_recovery(&self) -> bool {
        self.in_recovery_internal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_backoff_factors() {
        let mut cubic = Cubic::default();
        // with two emulated connections beta is (1 + 0.7) / 2
        assert_eq!(cubic.congestion_window_after_packet_loss(1000), 850);
        assert_eq!(cubic.last_max_congestion_window, 1000);

        // losing below the old max cedes room: last_max = 0.925 * 900
        assert_eq!(cubic.congestion_window_after_packet_loss(900), 765);
        assert_eq!(cubic.last_max_congestion_window, 832);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_growth_is_capped_per_epoch() {
        let mut cubic = Cubic::default();
        let now = Instant::now();
        let min_rtt = Duration::from_millis(100);

        let after_loss = cubic.congestion_window_after_packet_loss(100);
        assert_eq!(after_loss, 85);
        // first ack of the epoch: growth is at most half a packet count
        let target = cubic.congestion_window_after_ack(after_loss, min_rtt, now);
        assert!(target <= after_loss + 1, "target was {target}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_convex_region_grows_beyond_origin() {
        let mut cubic = Cubic::default();
        let start = Instant::now();
        let min_rtt = Duration::from_millis(100);

        let mut cwnd = cubic.congestion_window_after_packet_loss(100);
        // walk the curve well past the origin point
        for step in 0..600u64 {
            let now = start + Duration::from_millis(40 * step);
            cwnd = cubic.congestion_window_after_ack(cwnd, min_rtt, now);
        }
        assert!(cwnd > 100, "cwnd was {cwnd}, should pass the old max");
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_rate_limited_within_interval() {
        let mut cubic = Cubic::default();
        let now = Instant::now();
        let min_rtt = Duration::from_millis(100);

        cubic.congestion_window_after_packet_loss(100);
        let first = cubic.congestion_window_after_ack(85, min_rtt, now);
        // the same window within 30ms is answered from the cache
        let second =
            cubic.congestion_window_after_ack(85, min_rtt, now + Duration::from_millis(1));
        assert_eq!(second, first.max(cubic.estimated_tcp_congestion_window));
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_slow_start_and_loss() {
        let mut controller = CubicController::new(10);
        let rtt = RttEstimator::default();
        let now = Instant::now();
        assert_eq!(controller.congestion_window(), 10 * DEFAULT_MSS);
        assert!(controller.in_slow_start());

        controller.on_packet_sent(now, 0, 1, 1460, true);
        let acked = [Acked {
            pn: 1,
            bytes: 1460,
            sent_time: now,
            event_time: now,
        }];
        controller.on_congestion_event(true, 20 * DEFAULT_MSS, now, &acked, &[], &rtt);
        assert_eq!(controller.congestion_window(), 11 * DEFAULT_MSS);

        controller.on_packet_sent(now, 0, 2, 1460, true);
        let lost = [Lost {
            pn: 2,
            bytes: 1460,
            sent_time: now,
            spurious: false,
        }];
        controller.on_congestion_event(false, 20 * DEFAULT_MSS, now, &[], &lost, &rtt);
        // 11 packets * 0.85 = 9 packets
        assert_eq!(controller.congestion_window(), 9 * DEFAULT_MSS);
        assert!(!controller.in_slow_start());
        assert!(controller.in_recovery());

        // a second loss from the same round must not cut again
        let lost = [Lost {
            pn: 2,
            bytes: 1460,
            sent_time: now,
            spurious: false,
        }];
        controller.on_congestion_event(false, 20 * DEFAULT_MSS, now, &[], &lost, &rtt);
        assert_eq!(controller.congestion_window(), 9 * DEFAULT_MSS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spurious_loss_does_not_cut() {
        let mut controller = CubicController::new(10);
        let rtt = RttEstimator::default();
        let now = Instant::now();
        let lost = [Lost {
            pn: 1,
            bytes: 1460,
            sent_time: now,
            spurious: true,
        }];
        controller.on_congestion_event(false, 0, now, &[], &lost, &rtt);
        assert_eq!(controller.congestion_window(), 10 * DEFAULT_MSS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rto_collapses_window() {
        let mut controller = CubicController::new(10);
        controller.on_retransmission_timeout(false);
        assert_eq!(controller.congestion_window(), 10 * DEFAULT_MSS);
        controller.on_retransmission_timeout(true);
        assert_eq!(controller.congestion_window(), 2 * DEFAULT_MSS);
    }
}
