use std::ops::Range;

use qcore::{frame::StreamFrame, sid::StreamId};

/// One aggregated run of acknowledged stream bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckedRun {
    pub stream_id: StreamId,
    pub range: Range<u64>,
    pub fin: bool,
}

/// Coalesces per-frame stream acknowledgments into contiguous runs before
/// they reach the per-stream buffers.
///
/// Acks usually arrive as a burst of adjacent frames of the same stream;
/// merging `(stream_id, offset)` continuations into one range turns many
/// small interval operations into one. A fin, a different stream or a gap
/// flushes the run being built.
#[derive(Debug, Default)]
pub struct AckAggregator {
    current: Option<AckedRun>,
}

impl AckAggregator {
    /// Absorb one acked frame. If it cannot extend the run being built,
    /// the finished run is returned and the frame starts a new one.
    pub fn push(&mut self, frame: &StreamFrame) -> Option<AckedRun> {
        let range = frame.range();
        match &mut self.current {
            Some(run)
                if run.stream_id == frame.stream_id()
                    && run.range.end == range.start
                    && !run.fin =>
            {
                run.range.end = range.end;
                run.fin = frame.is_fin();
                None
            }
            _ => {
                let flushed = self.current.take();
                self.current = Some(AckedRun {
                    stream_id: frame.stream_id(),
                    range,
                    fin: frame.is_fin(),
                });
                flushed
            }
        }
    }

    /// Flush the run in progress.
    pub fn flush(&mut self) -> Option<AckedRun> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use qcore::sid::{Dir, Role};

    use super::*;

    fn frame(index: u64, offset: u64, len: usize, fin: bool) -> StreamFrame {
        let mut frame = StreamFrame::new(StreamId::new(Role::Client, Dir::Bi, index), offset, len);
        frame.set_fin(fin);
        frame
    }

    #[test]
    fn test_contiguous_frames_merge() {
        let mut agg = AckAggregator::default();
        assert_eq!(agg.push(&frame(0, 0, 100, false)), None);
        assert_eq!(agg.push(&frame(0, 100, 100, false)), None);
        let run = agg.flush().unwrap();
        assert_eq!(run.range, 0..200);
        assert!(!run.fin);
    }

    #[test]
    fn test_gap_flushes() {
        let mut agg = AckAggregator::default();
        agg.push(&frame(0, 0, 100, false));
        let flushed = agg.push(&frame(0, 300, 100, false)).unwrap();
        assert_eq!(flushed.range, 0..100);
        assert_eq!(agg.flush().unwrap().range, 300..400);
    }

    #[test]
    fn test_other_stream_flushes() {
        let mut agg = AckAggregator::default();
        agg.push(&frame(0, 0, 100, false));
        let flushed = agg.push(&frame(1, 100, 100, false)).unwrap();
        assert_eq!(flushed.stream_id, StreamId::new(Role::Client, Dir::Bi, 0));
    }

    #[test]
    fn test_fin_stops_extension() {
        let mut agg = AckAggregator::default();
        agg.push(&frame(0, 0, 100, true));
        // a fin-bearing run must not be extended
        let flushed = agg.push(&frame(0, 100, 50, false)).unwrap();
        assert!(flushed.fin);
        assert_eq!(flushed.range, 0..100);
    }
}
