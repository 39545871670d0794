use std::time::Duration;

use tokio::time::Instant;

/// The initial RTT assumed before any sample, per RFC 9002.
pub const INITIAL_RTT: Duration = Duration::from_millis(333);

/// Timer granularity; no timer is armed shorter than this.
pub const GRANULARITY: Duration = Duration::from_millis(1);

const MIN_RTT_WINDOW: Duration = Duration::from_secs(300);

/// RTT statistics: smoothed EWMA (alpha = 1/8), mean deviation, latest
/// sample and a windowed minimum that ignores ack delay.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    latest_rtt: Duration,
    smoothed_rtt: Duration,
    rttvar: Duration,
    min_rtt: Duration,
    min_rtt_at: Option<Instant>,
    first_sample_at: Option<Instant>,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self {
            latest_rtt: Duration::ZERO,
            smoothed_rtt: INITIAL_RTT,
            rttvar: INITIAL_RTT / 2,
            min_rtt: Duration::ZERO,
            min_rtt_at: None,
            first_sample_at: None,
        }
    }
}

impl RttEstimator {
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    pub fn has_sample(&self) -> bool {
        self.first_sample_at.is_some()
    }

    /// An estimator with known statistics, for tests.
    #[cfg(test)]
    pub(crate) fn seed(smoothed_rtt: Duration, rttvar: Duration) -> Self {
        Self {
            latest_rtt: smoothed_rtt,
            smoothed_rtt,
            rttvar,
            min_rtt: smoothed_rtt,
            min_rtt_at: None,
            first_sample_at: None,
        }
    }

    /// Feed one sample. The ack delay is subtracted only when plausible:
    /// the adjusted value must not undercut the minimum RTT.
    pub fn update(&mut self, latest_rtt: Duration, ack_delay: Duration, now: Instant) {
        if self.first_sample_at.is_none() {
            self.latest_rtt = latest_rtt;
            self.min_rtt = latest_rtt;
            self.min_rtt_at = Some(now);
            self.smoothed_rtt = latest_rtt;
            self.rttvar = latest_rtt / 2;
            self.first_sample_at = Some(now);
            return;
        }

        self.latest_rtt = latest_rtt;
        match self.min_rtt_at {
            // min_rtt expires after a window so a route change can surface
            Some(at) if now.duration_since(at) > MIN_RTT_WINDOW || latest_rtt < self.min_rtt => {
                self.min_rtt = latest_rtt;
                self.min_rtt_at = Some(now);
            }
            _ => {}
        }

        let mut adjusted_rtt = latest_rtt;
        if latest_rtt >= self.min_rtt + ack_delay {
            adjusted_rtt = latest_rtt - ack_delay;
        }

        let deviation = if self.smoothed_rtt > adjusted_rtt {
            self.smoothed_rtt - adjusted_rtt
        } else {
            adjusted_rtt - self.smoothed_rtt
        };
        self.rttvar = self.rttvar * 3 / 4 + deviation / 4;
        self.smoothed_rtt = self.smoothed_rtt * 7 / 8 + adjusted_rtt / 8;
    }

    /// Forget the smoothed statistics but keep min_rtt, used when an RTO
    /// turns out to be caused by stale metrics.
    pub fn expire_smoothed_metrics(&mut self) {
        let deviation = if self.smoothed_rtt > self.latest_rtt {
            self.smoothed_rtt - self.latest_rtt
        } else {
            self.latest_rtt - self.smoothed_rtt
        };
        self.rttvar = self.rttvar.max(deviation);
        self.smoothed_rtt = self.smoothed_rtt.max(self.latest_rtt);
    }

    /// The delay after which an unacked packet older than the newest ack
    /// is declared lost: 9/8 of max(srtt, latest), floored at granularity.
    pub fn loss_delay(&self, time_threshold_shift: u32) -> Duration {
        let rtt = self.smoothed_rtt.max(self.latest_rtt);
        (rtt + rtt / (1 << time_threshold_shift)).max(GRANULARITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_initializes_all() {
        let mut rtt = RttEstimator::default();
        assert_eq!(rtt.smoothed_rtt(), INITIAL_RTT);
        rtt.update(Duration::from_millis(100), Duration::ZERO, Instant::now());
        assert_eq!(rtt.smoothed_rtt(), Duration::from_millis(100));
        assert_eq!(rtt.min_rtt(), Duration::from_millis(100));
        assert_eq!(rtt.rttvar(), Duration::from_millis(50));
    }

    #[test]
    fn test_ewma_smoothing() {
        let mut rtt = RttEstimator::default();
        let now = Instant::now();
        rtt.update(Duration::from_millis(100), Duration::ZERO, now);
        rtt.update(Duration::from_millis(200), Duration::ZERO, now);
        // srtt = 7/8*100 + 1/8*200 = 112.5ms
        assert_eq!(rtt.smoothed_rtt(), Duration::from_micros(112_500));
        assert_eq!(rtt.min_rtt(), Duration::from_millis(100));
    }

    #[test]
    fn test_ack_delay_only_when_plausible() {
        let mut rtt = RttEstimator::default();
        let now = Instant::now();
        rtt.update(Duration::from_millis(100), Duration::ZERO, now);

        // 120ms sample with 30ms delay would undercut min_rtt: not adjusted
        rtt.update(Duration::from_millis(120), Duration::from_millis(30), now);
        assert_eq!(rtt.smoothed_rtt(), Duration::from_micros(102_500));

        // 150ms sample with 30ms delay is plausible: adjusted to 120ms
        let mut rtt = RttEstimator::default();
        rtt.update(Duration::from_millis(100), Duration::ZERO, now);
        rtt.update(Duration::from_millis(150), Duration::from_millis(30), now);
        assert_eq!(rtt.smoothed_rtt(), Duration::from_micros(102_500));
    }

    #[test]
    fn test_loss_delay() {
        let mut rtt = RttEstimator::default();
        rtt.update(Duration::from_millis(80), Duration::ZERO, Instant::now());
        // 80 + 80/8 = 90ms
        assert_eq!(rtt.loss_delay(3), Duration::from_millis(90));
    }
}
