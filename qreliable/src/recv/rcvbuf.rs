//! An implementation of the receiving buffer for stream data.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes};

/// 一段连续的数据片段
#[derive(Debug, Default)]
struct Segment {
    offset: u64,
    data: Bytes,
}

impl Segment {
    fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Received data of a stream is stored in [`RecvBuf`].
///
/// Stream frames arrive segmented and possibly out of order or overlapping.
/// The buffer keeps the deduplicated fragments sorted by offset and hands a
/// continuous prefix back to the reader as soon as one exists.
///
/// # Example
///
/// ```rust
/// # use bytes::{Bytes, BytesMut};
/// # use qreliable::recv::RecvBuf;
/// let mut rcvbuf = RecvBuf::default();
/// assert_eq!(rcvbuf.recv(0, Bytes::from("hell")), 4);
/// assert_eq!(rcvbuf.recv(7, Bytes::from("world!")), 9);
/// assert_eq!(rcvbuf.recv(3, Bytes::from("lo, ")), 0);
///
/// let mut received = BytesMut::new();
/// rcvbuf.try_read(&mut received);
/// assert_eq!(received.as_ref(), b"hello, world!");
/// ```
#[derive(Default, Debug)]
pub struct RecvBuf {
    nread: u64,
    largest_offset: u64,
    // segments are sorted by offset, pairwise disjoint, and all >= nread
    segments: VecDeque<Segment>,
}

impl RecvBuf {
    /// Returns whether the receiving buffer holds no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns how many continuous bytes have been read.
    pub fn nread(&self) -> u64 {
        self.nread
    }

    /// Returns the largest offset received so far.
    ///
    /// For a receiver whose final size is known, this never exceeds it.
    pub fn largest_offset(&self) -> u64 {
        self.largest_offset
    }

    /// Receive one fragment. Returns by how much the largest received
    /// offset advanced, which is the amount of receive-window consumed.
    pub fn recv(&mut self, offset: u64, mut data: Bytes) -> u64 {
        let previous_largest = self.largest_offset;

        // trim the part already read
        let skip = self.nread.saturating_sub(offset).min(data.len() as u64);
        data.advance(skip as usize);
        let mut start = offset.max(self.nread);

        while !data.is_empty() {
            // the first existing segment this fragment could collide with
            let idx = self.segments.partition_point(|seg| seg.end() <= start);
            match self.segments.get(idx) {
                // no collision to the right: store the rest in one piece
                None => {
                    self.push_segment(idx, start, core::mem::take(&mut data));
                }
                Some(seg) if start < seg.offset => {
                    // store the part in front of seg, keep the rest for the
                    // next round
                    let uncovered_len = ((seg.offset - start) as usize).min(data.len());
                    let uncovered = data.split_to(uncovered_len);
                    self.push_segment(idx, start, uncovered);
                    start += uncovered_len as u64;
                }
                Some(seg) => {
                    // start lies inside seg: drop the covered part
                    let covered = ((seg.end() - start) as usize).min(data.len());
                    data.advance(covered);
                    start += covered as u64;
                }
            }
        }

        self.largest_offset - previous_largest
    }

    fn push_segment(&mut self, idx: usize, offset: u64, data: Bytes) {
        debug_assert!(!data.is_empty());
        let segment = Segment { offset, data };
        self.largest_offset = self.largest_offset.max(segment.end());
        self.segments.insert(idx, segment);
    }

    /// Returns the length of the continuous unread prefix.
    pub fn available(&self) -> u64 {
        let mut end = self.nread;
        for seg in &self.segments {
            if seg.offset != end {
                break;
            }
            end = seg.end();
        }
        end - self.nread
    }

    /// Whether a continuous prefix is ready for the reader.
    pub fn is_readable(&self) -> bool {
        self.segments
            .front()
            .is_some_and(|seg| seg.offset == self.nread)
    }

    /// Move as much continuous data as fits into `dst`; returns the number
    /// of bytes moved.
    pub fn try_read(&mut self, dst: &mut impl BufMut) -> usize {
        let origin = dst.remaining_mut();
        while let Some(seg) = self.segments.front_mut() {
            if seg.offset != self.nread || !dst.has_remaining_mut() {
                break;
            }
            let read = dst.remaining_mut().min(seg.data.len());
            dst.put(seg.data.split_to(read));
            self.nread += read as u64;
            if seg.data.has_remaining() {
                seg.offset += read as u64;
            } else {
                self.segments.pop_front();
            }
        }
        origin - dst.remaining_mut()
    }

    /// Drop everything buffered; only offsets keep being tracked afterwards.
    pub fn discard(&mut self) {
        if let Some(end) = self.segments.back().map(|seg| seg.end()) {
            self.nread = self.nread.max(end);
        }
        self.segments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_overlap() {
        let mut buf = RecvBuf::default();
        assert_eq!(buf.recv(0, Bytes::from("hello")), 5);
        assert_eq!(buf.recv(6, Bytes::from("world")), 6);

        assert_eq!(buf.segments.len(), 2);
        assert!(!buf.is_readable() || buf.available() == 5);

        assert_eq!(buf.recv(5, Bytes::from(" ")), 0);
        assert_eq!(buf.segments.len(), 3);
        assert_eq!(buf.available(), 11);
    }

    #[test]
    fn test_left_partially_overlap() {
        let mut buf = RecvBuf::default();
        assert_eq!(buf.recv(0, Bytes::from("01234")), 5);
        assert_eq!(buf.recv(2, Bytes::from("2345")), 1);
        assert_eq!(buf.recv(6, Bytes::from("6789")), 4);
        assert_eq!(buf.available(), 10);

        let mut dst = bytes::BytesMut::new();
        buf.try_read(&mut dst);
        assert_eq!(dst.as_ref(), b"0123456789");
    }

    #[test]
    fn test_right_partially_overlap() {
        let mut buf = RecvBuf::default();
        assert_eq!(buf.recv(0, Bytes::from("hello")), 5);
        assert_eq!(buf.recv(6, Bytes::from("world!")), 7);
        assert_eq!(buf.recv(5, Bytes::from(" wor")), 0);
        assert_eq!(buf.available(), 12);
    }

    #[test]
    fn test_fully_covered_fragment() {
        let mut buf = RecvBuf::default();
        assert_eq!(buf.recv(0, Bytes::from("0123456789")), 10);
        assert_eq!(buf.recv(2, Bytes::from("2345")), 0);
        assert_eq!(buf.segments.len(), 1);
        assert_eq!(buf.available(), 10);
    }

    #[test]
    fn test_fragment_covering_existing() {
        let mut buf = RecvBuf::default();
        assert_eq!(buf.recv(2, Bytes::from("23")), 4);
        assert_eq!(buf.recv(6, Bytes::from("67")), 4);
        // one fragment spanning before, between and after both
        assert_eq!(buf.recv(0, Bytes::from("012345678")), 1);
        assert_eq!(buf.available(), 9);

        let mut dst = bytes::BytesMut::new();
        buf.try_read(&mut dst);
        assert_eq!(dst.as_ref(), b"012345678");
    }

    #[test]
    fn test_duplicate_of_read_data() {
        let mut buf = RecvBuf::default();
        buf.recv(0, Bytes::from("hello"));
        let mut dst = bytes::BytesMut::new();
        buf.try_read(&mut dst);
        assert_eq!(buf.nread(), 5);

        // a full duplicate of already-read data changes nothing
        assert_eq!(buf.recv(0, Bytes::from("hello")), 0);
        assert!(buf.is_empty());
        // a straddling duplicate only keeps the new tail
        assert_eq!(buf.recv(3, Bytes::from("lo!")), 1);
        assert_eq!(buf.available(), 1);
    }

    #[test]
    fn test_partial_read_keeps_cursor() {
        let mut buf = RecvBuf::default();
        buf.recv(0, Bytes::from("hello world"));

        let mut dst = [0u8; 5];
        let mut cursor = &mut dst[..];
        assert_eq!(buf.try_read(&mut cursor), 5);
        assert_eq!(&dst, b"hello");
        assert_eq!(buf.nread(), 5);
        assert_eq!(buf.available(), 6);
    }

    #[test]
    fn test_discard() {
        let mut buf = RecvBuf::default();
        buf.recv(0, Bytes::from("hello"));
        buf.recv(10, Bytes::from("world"));
        buf.discard();
        assert!(buf.is_empty());
        assert_eq!(buf.nread(), 15);
        assert_eq!(buf.largest_offset(), 15);
    }
}
