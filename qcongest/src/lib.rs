//! Congestion control and loss recovery: RTT estimation, bandwidth
//! sampling, the CUBIC and BBR2 send algorithms, token-bucket pacing and
//! the retransmission-timer state machine that drives them.

use tokio::time::Instant;

/// Bits-per-second bandwidth arithmetic.
pub mod bandwidth;
/// The BBR2 network model and controller.
pub mod bbr2;
/// The CUBIC window arithmetic and controller.
pub mod cubic;
/// Packet-threshold and time-threshold loss detection.
pub mod loss;
/// The sent-packet manager: timers, probes and the recovery pipeline.
pub mod manager;
/// Windowed max filter over round-trip counts.
pub mod minmax;
/// Token-bucket pacing over a wrapped send algorithm.
pub mod pacing;
/// RTT estimation.
pub mod rtt;
/// The bandwidth sampler and ack-aggregation tracker.
pub mod sampler;
/// Handshake and anti-amplification status shared with the manager.
pub mod status;

use bandwidth::Bandwidth;
use rtt::RttEstimator;

/// Default maximum segment size used for window arithmetic, bytes.
pub const DEFAULT_MSS: u64 = 1460;

/// A packet acknowledged by the peer, as the send algorithms see it.
#[derive(Debug, Clone, Copy)]
pub struct Acked {
    pub pn: u64,
    pub bytes: u64,
    pub sent_time: Instant,
    /// Receive time of the ack that covered this packet.
    pub event_time: Instant,
}

/// A packet declared lost, as the send algorithms see it.
#[derive(Debug, Clone, Copy)]
pub struct Lost {
    pub pn: u64,
    pub bytes: u64,
    pub sent_time: Instant,
    /// A previously declared loss turned out spurious (late ack).
    pub spurious: bool,
}

/// The window-based send algorithm interface both CUBIC and BBR2
/// implement; the pacing sender wraps one of these.
pub trait SendAlgorithm: Send + std::fmt::Debug {
    /// The size of the current congestion window in bytes.
    fn congestion_window(&self) -> u64;

    /// Whether the sender may transmit right now; pacing may still delay.
    fn can_send(&self, bytes_in_flight: u64) -> bool;

    /// Must be called for every packet written to the wire.
    fn on_packet_sent(
        &mut self,
        sent_time: Instant,
        bytes_in_flight: u64,
        pn: u64,
        bytes: u64,
        is_retransmittable: bool,
    );

    /// A congestion event: some packets acked and/or lost, possibly a new
    /// RTT sample.
    fn on_congestion_event(
        &mut self,
        rtt_updated: bool,
        prior_in_flight: u64,
        event_time: Instant,
        acked_packets: &[Acked],
        lost_packets: &[Lost],
        rtt: &RttEstimator,
    );

    /// A retransmission timeout fired; `packets_retransmitted` tells
    /// whether anything was actually retransmitted.
    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool);

    /// The sender ran out of application data with window to spare.
    fn on_application_limited(&mut self, bytes_in_flight: u64);

    /// The pacing rate for the given load.
    fn pacing_rate(&self, bytes_in_flight: u64) -> Bandwidth;

    /// The estimated bottleneck bandwidth, if the algorithm tracks one.
    fn bandwidth_estimate(&self) -> Bandwidth;

    fn is_cwnd_limited(&self, bytes_in_flight: u64) -> bool {
        bytes_in_flight >= self.congestion_window()
    }

    /// Whether the algorithm is in its post-loss recovery phase.
    fn in_recovery(&self) -> bool;
}

impl SendAlgorithm for Box<dyn SendAlgorithm> {
    fn congestion_window(&self) -> u64 {
        (**self).congestion_window()
    }

    fn can_send(&self, bytes_in_flight: u64) -> bool {
        (**self).can_send(bytes_in_flight)
    }

    fn on_packet_sent(
        &mut self,
        sent_time: Instant,
        bytes_in_flight: u64,
        pn: u64,
        bytes: u64,
        is_retransmittable: bool,
    ) {
        (**self).on_packet_sent(sent_time, bytes_in_flight, pn, bytes, is_retransmittable)
    }

    fn on_congestion_event(
        &mut self,
        rtt_updated: bool,
        prior_in_flight: u64,
        event_time: Instant,
        acked_packets: &[Acked],
        lost_packets: &[Lost],
        rtt: &RttEstimator,
    ) {
        (**self).on_congestion_event(
            rtt_updated,
            prior_in_flight,
            event_time,
            acked_packets,
            lost_packets,
            rtt,
        )
    }

    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool) {
        (**self).on_retransmission_timeout(packets_retransmitted)
    }

    fn on_application_limited(&mut self, bytes_in_flight: u64) {
        (**self).on_application_limited(bytes_in_flight)
    }

    fn pacing_rate(&self, bytes_in_flight: u64) -> Bandwidth {
        (**self).pacing_rate(bytes_in_flight)
    }

    fn bandwidth_estimate(&self) -> Bandwidth {
        (**self).bandwidth_estimate()
    }

    fn is_cwnd_limited(&self, bytes_in_flight: u64) -> bool {
        (**self).is_cwnd_limited(bytes_in_flight)
    }

    fn in_recovery(&self) -> bool {
        (**self).in_recovery()
    }
}
