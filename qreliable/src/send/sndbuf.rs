use std::{collections::VecDeque, ops::Range};

use bytes::{BufMut, Bytes};
use qcore::util::IntervalSet;

/// Saved data is chopped into owned slices of at most this many bytes, so
/// acked prefixes can be released without holding the whole write alive.
pub const MAX_DATA_SLICE_SIZE: usize = 4096;

/// 一段已入队的流数据，其data在完全被确认后被清空以释放内存
#[derive(Debug)]
struct BufferedSlice {
    offset: u64,
    data: Bytes,
    len: usize,
}

impl BufferedSlice {
    fn end(&self) -> u64 {
        self.offset + self.len as u64
    }

    fn is_freed(&self) -> bool {
        self.data.is_empty()
    }
}

/// Internal-inconsistency errors of the send buffer. Under a correct local
/// caller and peer these are unreachable; the connection treats them as
/// internal errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendBufError {
    #[error("tried to write stream data out of sequence, offset {offset} beyond {end}")]
    OutOfSequence { offset: u64, end: u64 },
    #[error("tried to write stream data that is not in the buffer")]
    MissingData,
    #[error("acked {newly} bytes while only {outstanding} bytes are outstanding")]
    AckedUnsentData { newly: u64, outstanding: u64 },
}

/// The send buffer of one stream: an interval deque of owned slices plus
/// the acked and to-retransmit interval bookkeeping.
///
/// Slices stay in the deque until every byte of them is acknowledged; the
/// freed prefix is only collapsed from the front, so offsets of live
/// slices stay contiguous and strictly ordered.
#[derive(Debug, Default)]
pub struct SendBuf {
    slices: VecDeque<BufferedSlice>,
    bytes_acked: IntervalSet,
    pending_retransmissions: IntervalSet,
    /// End offset of all data saved into the buffer.
    stream_offset: u64,
    /// Forward-only cursor: everything below it has been emitted at least
    /// once, and writes may not seek beyond it out of order.
    current_end_offset: u64,
    /// Bytes handed to packets, first transmissions only.
    stream_bytes_written: u64,
    /// Bytes written to the wire and not yet acknowledged.
    stream_bytes_outstanding: u64,
}

impl SendBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slices: VecDeque::with_capacity(capacity),
            ..Default::default()
        }
    }

    /// End offset of the data saved so far; the offset the next
    /// [`SendBuf::save_stream_data`] will continue at.
    pub fn stream_offset(&self) -> u64 {
        self.stream_offset
    }

    pub fn stream_bytes_written(&self) -> u64 {
        self.stream_bytes_written
    }

    pub fn stream_bytes_outstanding(&self) -> u64 {
        self.stream_bytes_outstanding
    }

    /// Bytes saved but not yet handed to any packet.
    pub fn unwritten(&self) -> u64 {
        self.stream_offset - self.stream_bytes_written
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Append data, splitting it into owned slices.
    pub fn save_stream_data(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let len = data.len().min(MAX_DATA_SLICE_SIZE);
            self.save_mem_slice(Bytes::copy_from_slice(&data[..len]));
            data = &data[len..];
        }
    }

    /// Move an owned slice into the buffer.
    pub fn save_mem_slice(&mut self, slice: Bytes) {
        if slice.is_empty() {
            return;
        }
        if self.slices.is_empty() {
            self.current_end_offset = self.current_end_offset.max(self.stream_offset);
        }
        let len = slice.len();
        self.slices.push_back(BufferedSlice {
            offset: self.stream_offset,
            data: slice,
            len,
        });
        self.stream_offset += len as u64;
    }

    /// Record that `bytes` were consumed into a packet for the first time.
    pub fn on_data_consumed(&mut self, bytes: u64) {
        self.stream_bytes_written += bytes;
        self.stream_bytes_outstanding += bytes;
    }

    /// Copy `[offset, offset + length)` into `dst`, seeking through the
    /// slice deque. Seeking beyond [`current_end_offset`] is out of order
    /// and refused.
    ///
    /// [`current_end_offset`]: SendBuf::current_end_offset
    pub fn write_stream_data(
        &mut self,
        offset: u64,
        length: usize,
        dst: &mut impl BufMut,
    ) -> Result<(), SendBufError> {
        if offset > self.current_end_offset {
            return Err(SendBufError::OutOfSequence {
                offset,
                end: self.current_end_offset,
            });
        }
        let mut offset = offset;
        let mut length = length as u64;
        let start = self
            .slices
            .partition_point(|slice| slice.end() <= offset);
        for slice in self.slices.range(start..) {
            if length == 0 {
                break;
            }
            if offset < slice.offset || slice.is_freed() {
                return Err(SendBufError::MissingData);
            }
            let slice_offset = (offset - slice.offset) as usize;
            let available = slice.len - slice_offset;
            let copy_length = (length as usize).min(available);
            dst.put_slice(&slice.data[slice_offset..slice_offset + copy_length]);
            offset += copy_length as u64;
            length -= copy_length as u64;
            self.current_end_offset = self.current_end_offset.max(slice.end());
        }
        if length == 0 {
            Ok(())
        } else {
            Err(SendBufError::MissingData)
        }
    }

    /// Handle an acknowledgment of `[offset, offset + length)`. Returns the
    /// number of newly acked bytes; bytes acked twice count once.
    pub fn on_data_acked(&mut self, offset: u64, length: u64) -> Result<u64, SendBufError> {
        if length == 0 {
            return Ok(0);
        }
        let range = offset..offset + length;
        let newly = self.bytes_acked.overlap(&range);
        let newly = length - newly;
        if newly == 0 {
            return Ok(0);
        }
        if self.stream_bytes_outstanding < newly {
            return Err(SendBufError::AckedUnsentData {
                newly,
                outstanding: self.stream_bytes_outstanding,
            });
        }
        self.bytes_acked.insert(range.clone());
        self.stream_bytes_outstanding -= newly;
        self.pending_retransmissions.remove(&range);
        self.free_slices(&range);
        self.cleanup_freed_front();
        Ok(newly)
    }

    /// Mark the unacked part of `[offset, offset + length)` for
    /// retransmission.
    pub fn on_data_lost(&mut self, offset: u64, length: u64) {
        if length == 0 {
            return;
        }
        for hole in self.bytes_acked.holes_within(&(offset..offset + length)) {
            self.pending_retransmissions.insert(hole);
        }
    }

    /// The range was retransmitted; it is no longer pending.
    pub fn on_data_retransmitted(&mut self, offset: u64, length: u64) {
        if length == 0 {
            return;
        }
        self.pending_retransmissions.remove(&(offset..offset + length));
    }

    pub fn has_pending_retransmission(&self) -> bool {
        !self.pending_retransmissions.is_empty()
    }

    /// The first range waiting for retransmission, if any.
    pub fn next_pending_retransmission(&self) -> Option<Range<u64>> {
        self.pending_retransmissions.iter().next().cloned()
    }

    /// Whether any byte of the range has been sent but not acked.
    pub fn is_outstanding(&self, offset: u64, length: u64) -> bool {
        length > 0 && !self.bytes_acked.covers(&(offset..offset + length))
    }

    fn free_slices(&mut self, acked: &Range<u64>) {
        let start = self
            .slices
            .partition_point(|slice| slice.end() <= acked.start);
        for slice in self.slices.range_mut(start..) {
            if slice.offset >= acked.end {
                break;
            }
            if !slice.is_freed()
                && self.bytes_acked.covers(&(slice.offset..slice.end()))
            {
                slice.data = Bytes::new();
            }
        }
    }

    fn cleanup_freed_front(&mut self) {
        while let Some(slice) = self.slices.front() {
            if !slice.is_freed() {
                break;
            }
            debug_assert!(slice.offset <= self.current_end_offset);
            self.slices.pop_front();
        }
    }
}
