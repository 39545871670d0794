use qcore::config::LossDetectionConfig;
use tokio::time::Instant;

use crate::rtt::RttEstimator;

/// A packet eligible for loss detection: still unacked, with a number no
/// larger than the largest acknowledged.
#[derive(Debug, Clone, Copy)]
pub struct LossCandidate {
    pub pn: u64,
    pub sent_time: Instant,
    pub bytes: u64,
}

/// The outcome of one detection pass.
#[derive(Debug, Default)]
pub struct LossDetectionResult {
    /// Packets now declared lost.
    pub lost: Vec<LossCandidate>,
    /// When the earliest still-unacked packet will cross the time
    /// threshold; the loss timer should fire then.
    pub loss_time: Option<Instant>,
}

/// Declares packets lost by reordering distance or by time since sending,
/// with optional adaptive widening when losses turn out spurious.
#[derive(Debug)]
pub struct LossDetector {
    reordering_threshold: u64,
    time_threshold_shift: u32,
    adaptive_reordering_threshold: bool,
    adaptive_time_threshold: bool,
    packet_threshold_min_bytes: Option<u64>,
}

impl LossDetector {
    pub fn new(config: &LossDetectionConfig) -> Self {
        Self {
            reordering_threshold: config.reordering_threshold,
            time_threshold_shift: config.time_threshold_shift,
            adaptive_reordering_threshold: config.adaptive_reordering_threshold,
            adaptive_time_threshold: config.adaptive_time_threshold,
            packet_threshold_min_bytes: config.packet_threshold_min_bytes,
        }
    }

    pub fn reordering_threshold(&self) -> u64 {
        self.reordering_threshold
    }

    /// Walk the unacked candidates (ascending packet number) and split
    /// them into lost and still-pending.
    pub fn detect(
        &self,
        largest_acked: u64,
        rtt: &RttEstimator,
        now: Instant,
        candidates: &[LossCandidate],
    ) -> LossDetectionResult {
        let loss_delay = rtt.loss_delay(self.time_threshold_shift);
        let mut result = LossDetectionResult::default();

        for candidate in candidates {
            if candidate.pn > largest_acked {
                break;
            }
            if now.duration_since(candidate.sent_time) >= loss_delay {
                result.lost.push(*candidate);
                continue;
            }
            // runt packets are spared the reordering threshold: a tiny
            // straggler reordered behind a burst is not a loss signal
            let packet_threshold_applies = self
                .packet_threshold_min_bytes
                .map_or(true, |min| candidate.bytes >= min);
            if packet_threshold_applies
                && largest_acked >= candidate.pn + self.reordering_threshold
            {
                result.lost.push(*candidate);
                continue;
            }
            let when = candidate.sent_time + loss_delay;
            result.loss_time = Some(result.loss_time.map_or(when, |t| t.min(when)));
        }
        result
    }

    /// A packet declared lost was acked after all; widen the thresholds
    /// if the adaptive options are on.
    pub fn on_spurious_loss(&mut self, reordering_distance: u64) {
        if self.adaptive_reordering_threshold {
            self.reordering_threshold = self.reordering_threshold.max(reordering_distance + 1);
        }
        if self.adaptive_time_threshold && self.time_threshold_shift > 1 {
            self.time_threshold_shift -= 1;
        }
    }
}
