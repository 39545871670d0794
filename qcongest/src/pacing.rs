use std::time::Duration;

use qcore::config::PacingConfig;
use tokio::time::Instant;

use crate::{
    Acked, Lost, SendAlgorithm, DEFAULT_MSS,
    bandwidth::Bandwidth,
    rtt::{GRANULARITY, RttEstimator},
};

/// Spreads packets over time at the wrapped algorithm's pacing rate.
///
/// A connection leaving quiescence may emit a burst without delay; inside
/// a pacing interval a small lump of packets may still leave together so
/// the sender does not wake per packet.
#[derive(Debug)]
pub struct PacingSender<S> {
    sender: S,
    config: PacingConfig,
    burst_tokens: u32,
    lumpy_tokens: u32,
    ideal_next_packet_send_time: Option<Instant>,
    pacing_limited: bool,
}

impl<S: SendAlgorithm> PacingSender<S> {
    pub fn new(sender: S, config: PacingConfig) -> Self {
        Self {
            sender,
            burst_tokens: config.initial_burst_size as u32,
            lumpy_tokens: 0,
            ideal_next_packet_send_time: None,
            pacing_limited: false,
            config,
        }
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    pub fn sender_mut(&mut self) -> &mut S {
        &mut self.sender
    }

    pub fn congestion_window(&self) -> u64 {
        self.sender.congestion_window()
    }

    pub fn bandwidth_estimate(&self) -> Bandwidth {
        self.sender.bandwidth_estimate()
    }

    fn pacing_rate(&self, bytes_in_flight: u64) -> Bandwidth {
        self.sender.pacing_rate(bytes_in_flight)
    }

    /// How long to wait before the next packet may leave. `None` means the
    /// congestion controller refuses outright.
    pub fn time_until_send(&self, now: Instant, bytes_in_flight: u64) -> Option<Duration> {
        if !self.sender.can_send(bytes_in_flight) {
            return None;
        }
        if self.burst_tokens > 0 || bytes_in_flight == 0 || self.lumpy_tokens > 0 {
            return Some(Duration::ZERO);
        }
        match self.ideal_next_packet_send_time {
            // within alarm granularity the packet goes now
            Some(ideal) if ideal > now + GRANULARITY => Some(ideal.duration_since(now)),
            _ => Some(Duration::ZERO),
        }
    }

    pub fn on_packet_sent(
        &mut self,
        sent_time: Instant,
        bytes_in_flight: u64,
        pn: u64,
        bytes: u64,
        is_retransmittable: bool,
    ) {
        self.sender
            .on_packet_sent(sent_time, bytes_in_flight, pn, bytes, is_retransmittable);
        if !is_retransmittable {
            return;
        }

        // leaving quiescence earns a fresh unpaced burst, capped by cwnd
        if bytes_in_flight == 0 && !self.sender.in_recovery() {
            self.burst_tokens = (self.config.initial_burst_size as u32)
                .min((self.sender.congestion_window() / DEFAULT_MSS) as u32);
        }
        if self.burst_tokens > 0 {
            self.burst_tokens -= 1;
            self.ideal_next_packet_send_time = None;
            self.pacing_limited = false;
            return;
        }

        // The next packet leaves once this one has been transferred; the
        // rate includes this packet's bytes.
        let delay = self.pacing_rate(bytes_in_flight + bytes).transfer_time(bytes);
        if !self.pacing_limited || self.lumpy_tokens == 0 {
            self.lumpy_tokens = ((self.config.lumpy_pacing_size as u32).min(
                ((self.sender.congestion_window() as f32
                    * self.config.lumpy_pacing_cwnd_fraction)
                    / DEFAULT_MSS as f32) as u32,
            ))
            .max(1);
            if self.sender.bandwidth_estimate()
                < Bandwidth::from_kbits_per_second(self.config.lumpy_pacing_min_bandwidth_kbps)
            {
                // one full-sized packet is already ~10ms of queueing here
                self.lumpy_tokens = 1;
            }
            if bytes_in_flight + bytes >= self.sender.congestion_window() {
                self.lumpy_tokens = 1;
            }
        }
        self.lumpy_tokens -= 1;

        self.ideal_next_packet_send_time = Some(if self.pacing_limited {
            // make up for lost time: pacing itself throttled the sending
            self.ideal_next_packet_send_time
                .map_or(sent_time + delay, |ideal| ideal + delay)
        } else {
            self.ideal_next_packet_send_time
                .map_or(sent_time + delay, |ideal| (ideal + delay).max(sent_time + delay))
        });
        self.pacing_limited = self.sender.can_send(bytes_in_flight + bytes);
    }

    pub fn on_congestion_event(
        &mut self,
        rtt_updated: bool,
        prior_in_flight: u64,
        event_time: Instant,
        acked_packets: &[Acked],
        lost_packets: &[Lost],
        rtt: &RttEstimator,
    ) {
        if !lost_packets.is_empty() {
            // no bursting into recovery
            self.burst_tokens = 0;
        }
        self.sender.on_congestion_event(
            rtt_updated,
            prior_in_flight,
            event_time,
            acked_packets,
            lost_packets,
            rtt,
        );
    }

    pub fn on_retransmission_timeout(&mut self, packets_retransmitted: bool) {
        self.sender.on_retransmission_timeout(packets_retransmitted);
    }

    /// The send ran dry; stop making up for lost time.
    pub fn on_application_limited(&mut self, bytes_in_flight: u64) {
        self.pacing_limited = false;
        self.sender.on_application_limited(bytes_in_flight);
    }

    pub fn can_send(&self, bytes_in_flight: u64) -> bool {
        self.sender.can_send(bytes_in_flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A fixed-rate, fixed-window algorithm to pace over.
    #[derive(Debug)]
    struct FixedSender {
        cwnd: u64,
        rate: Bandwidth,
        recovery: bool,
    }

    impl SendAlgorithm for FixedSender {
        fn congestion_window(&self) -> u64 {
            self.cwnd
        }

        fn can_send(&self, bytes_in_flight: u64) -> bool {
            bytes_in_flight < self.cwnd
        }

        fn on_packet_sent(&mut self, _: Instant, _: u64, _: u64, _: u64, _: bool) {}

        fn on_congestion_event(
            &mut self,
            _: bool,
            _: u64,
            _: Instant,
            _: &[Acked],
            lost: &[Lost],
            _: &RttEstimator,
        ) {
            self.recovery |= !lost.is_empty();
        }

        fn on_retransmission_timeout(&mut self, _: bool) {}

        fn on_application_limited(&mut self, _: u64) {}

        fn pacing_rate(&self, _: u64) -> Bandwidth {
            self.rate
        }

        fn bandwidth_estimate(&self) -> Bandwidth {
            self.rate
        }

        fn in_recovery(&self) -> bool {
            self.recovery
        }
    }

    fn pacer() -> PacingSender<FixedSender> {
        // one full packet per millisecond, a 20-packet window
        PacingSender::new(
            FixedSender {
                cwnd: 20 * DEFAULT_MSS,
                rate: Bandwidth::from_bytes_per_second(DEFAULT_MSS * 1000),
                recovery: false,
            },
            PacingConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_burst_then_lumpy_then_paced() {
        let mut pacer = pacer();
        let now = Instant::now();
        let mut in_flight = 0u64;

        // the initial burst of 10 leaves without any delay
        for pn in 0..10u64 {
            assert_eq!(pacer.time_until_send(now, in_flight), Some(Duration::ZERO));
            pacer.on_packet_sent(now, in_flight, pn, DEFAULT_MSS, true);
            in_flight += DEFAULT_MSS;
        }

        // the 11th is still free, and earns the lumpy tokens
        assert_eq!(pacer.time_until_send(now, in_flight), Some(Duration::ZERO));
        pacer.on_packet_sent(now, in_flight, 10, DEFAULT_MSS, true);
        in_flight += DEFAULT_MSS;

        // the 12th rides the second lumpy token
        assert_eq!(pacer.time_until_send(now, in_flight), Some(Duration::ZERO));
        pacer.on_packet_sent(now, in_flight, 11, DEFAULT_MSS, true);
        in_flight += DEFAULT_MSS;

        // the 13th is paced: two transfer times are owed by now
        assert_eq!(
            pacer.time_until_send(now, in_flight),
            Some(Duration::from_millis(2))
        );

        // advancing the clock clears the delay
        let later = now + Duration::from_millis(2);
        assert_eq!(pacer.time_until_send(later, in_flight), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cwnd_refusal_is_infinite() {
        let pacer = pacer();
        let now = Instant::now();
        assert_eq!(pacer.time_until_send(now, 20 * DEFAULT_MSS), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loss_clears_burst_tokens() {
        let mut pacer = pacer();
        let now = Instant::now();
        let rtt = RttEstimator::default();
        assert_eq!(pacer.burst_tokens, 10);

        let lost = [Lost {
            pn: 1,
            bytes: DEFAULT_MSS,
            sent_time: now,
            spurious: false,
        }];
        pacer.on_congestion_event(false, DEFAULT_MSS, now, &[], &lost, &rtt);
        assert_eq!(pacer.burst_tokens, 0);

        // a paced packet follows immediately, no burst
        pacer.on_packet_sent(now, DEFAULT_MSS, 2, DEFAULT_MSS, true);
        assert!(pacer.ideal_next_packet_send_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiescence_refills_burst() {
        let mut pacer = pacer();
        let now = Instant::now();

        // drain the initial burst
        let mut in_flight = 0u64;
        for pn in 0..10u64 {
            pacer.on_packet_sent(now, in_flight, pn, DEFAULT_MSS, true);
            in_flight += DEFAULT_MSS;
        }
        assert_eq!(pacer.burst_tokens, 0);

        // everything acked: the next send out of quiescence bursts again
        pacer.on_packet_sent(now + Duration::from_secs(1), 0, 10, DEFAULT_MSS, true);
        assert_eq!(pacer.burst_tokens, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_bandwidth_disables_lumpiness() {
        let mut pacer = PacingSender::new(
            FixedSender {
                cwnd: 20 * DEFAULT_MSS,
                // 800 kbit/s is below the 1200 kbit/s lumpy floor
                rate: Bandwidth::from_kbits_per_second(800),
                recovery: false,
            },
            PacingConfig::default(),
        );
        let now = Instant::now();
        let mut in_flight = 0u64;
        for pn in 0..10u64 {
            pacer.on_packet_sent(now, in_flight, pn, DEFAULT_MSS, true);
            in_flight += DEFAULT_MSS;
        }
        pacer.on_packet_sent(now, in_flight, 10, DEFAULT_MSS, true);
        // the refill was clamped to one and immediately spent
        assert_eq!(pacer.lumpy_tokens, 0);
        in_flight += DEFAULT_MSS;
        assert!(pacer.time_until_send(now, in_flight) > Some(Duration::ZERO));
    }
}
