use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::QpackError;

/// The dynamic-table references of one encoded field section.
#[derive(Debug, Clone)]
struct HeaderBlock {
    /// Absolute indices the section references, ascending.
    indices: Vec<u64>,
    required_insert_count: u64,
}

/// Tracks, on the encoder side, which dynamic-table entries are still
/// referenced by unacknowledged field sections, and how far the decoder
/// is known to have caught up.
///
/// The table must never evict an entry below
/// [`BlockingManager::smallest_blocking_index`]; a stream sits in the
/// blocked set exactly while one of its outstanding sections requires
/// more inserts than the decoder has acknowledged.
#[derive(Debug, Default)]
pub struct BlockingManager {
    header_blocks: HashMap<u64, VecDeque<HeaderBlock>>,
    // absolute index -> outstanding reference count
    entry_reference_counts: BTreeMap<u64, u64>,
    // stream id -> the largest required insert count among its blocks
    blocked_streams: HashMap<u64, u64>,
    known_received_count: u64,
}

impl BlockingManager {
    pub fn known_received_count(&self) -> u64 {
        self.known_received_count
    }

    pub fn blocked_stream_count(&self) -> usize {
        self.blocked_streams.len()
    }

    /// The required insert count of a section is one past its largest
    /// referenced index.
    pub fn required_insert_count(indices: &[u64]) -> u64 {
        indices.last().map_or(0, |largest| largest + 1)
    }

    /// The smallest absolute index still referenced by any outstanding
    /// section; the table must not evict at or below it.
    pub fn smallest_blocking_index(&self) -> u64 {
        self.entry_reference_counts
            .keys()
            .next()
            .copied()
            .unwrap_or(u64::MAX)
    }

    /// Whether a section on `stream_id` may reference entries the decoder
    /// has not acknowledged: either the stream is already blocked, or a
    /// blocked-stream slot is free.
    pub fn blocking_allowed_on_stream(&self, stream_id: u64, maximum_blocked_streams: u64) -> bool {
        self.blocked_streams.contains_key(&stream_id)
            || (self.blocked_streams.len() as u64) < maximum_blocked_streams
    }

    /// A field section with dynamic references left on `stream_id`.
    pub fn on_header_block_sent(
        &mut self,
        stream_id: u64,
        indices: Vec<u64>,
        required_insert_count: u64,
    ) {
        debug_assert!(!indices.is_empty());
        debug_assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));
        for index in &indices {
            *self.entry_reference_counts.entry(*index).or_insert(0) += 1;
        }
        if required_insert_count > self.known_received_count {
            let entry = self.blocked_streams.entry(stream_id).or_insert(0);
            *entry = (*entry).max(required_insert_count);
        }
        self.header_blocks
            .entry(stream_id)
            .or_default()
            .push_back(HeaderBlock {
                indices,
                required_insert_count,
            });
    }

    /// Section Acknowledgement: the oldest outstanding section of the
    /// stream was decoded. Returns false on a stray acknowledgment, which
    /// the caller must treat as a decoder-stream error.
    pub fn on_header_acknowledgement(&mut self, stream_id: u64) -> bool {
        let Some(blocks) = self.header_blocks.get_mut(&stream_id) else {
            return false;
        };
        let block = blocks.pop_front().expect("empty block lists are removed");
        if blocks.is_empty() {
            self.header_blocks.remove(&stream_id);
        }

        if self.known_received_count < block.required_insert_count {
            self.known_received_count = block.required_insert_count;
            self.unblock_streams();
        }
        self.decrease_reference_counts(&block.indices);
        true
    }

    /// Stream Cancellation: all of the stream's sections are abandoned.
    pub fn on_stream_cancellation(&mut self, stream_id: u64) {
        if let Some(blocks) = self.header_blocks.remove(&stream_id) {
            for block in &blocks {
                self.decrease_reference_counts(&block.indices);
            }
        }
        self.blocked_streams.remove(&stream_id);
    }

    /// Insert Count Increment from the decoder stream.
    pub fn on_insert_count_increment(
        &mut self,
        increment: u64,
        inserted_entry_count: u64,
    ) -> Result<(), QpackError> {
        if increment == 0 {
            return Err(QpackError::DecoderStreamError(
                "insert count increment of zero".to_string(),
            ));
        }
        let new_count = self
            .known_received_count
            .checked_add(increment)
            .filter(|count| *count <= inserted_entry_count)
            .ok_or_else(|| {
                QpackError::DecoderStreamError(
                    "insert count increment advances past the inserted entry count".to_string(),
                )
            })?;
        self.known_received_count = new_count;
        self.unblock_streams();
        Ok(())
    }

    fn unblock_streams(&mut self) {
        let known = self.known_received_count;
        self.blocked_streams.retain(|_, required| *required > known);
    }

    fn decrease_reference_counts(&mut self, indices: &[u64]) {
        for index in indices {
            match self.entry_reference_counts.get_mut(index) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    self.entry_reference_counts.remove(index);
                }
                None => debug_assert!(false, "reference count underflow"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_until_acknowledged() {
        let mut manager = BlockingManager::default();
        manager.on_header_block_sent(0, vec![0, 1], 2);
        assert_eq!(manager.blocked_stream_count(), 1);
        assert_eq!(manager.smallest_blocking_index(), 0);

        assert!(manager.on_header_acknowledgement(0));
        assert_eq!(manager.known_received_count(), 2);
        assert_eq!(manager.blocked_stream_count(), 0);
        assert_eq!(manager.smallest_blocking_index(), u64::MAX);
    }

    #[test]
    fn test_blocking_cap() {
        let mut manager = BlockingManager::default();
        manager.on_header_block_sent(0, vec![0], 1);
        manager.on_header_block_sent(4, vec![0], 1);
        assert_eq!(manager.blocked_stream_count(), 2);

        // two slots taken: a third stream may not block, a blocked one may
        assert!(!manager.blocking_allowed_on_stream(8, 2));
        assert!(manager.blocking_allowed_on_stream(0, 2));
        assert!(manager.blocking_allowed_on_stream(8, 3));
    }

    #[test]
    fn test_sections_below_known_count_do_not_block() {
        let mut manager = BlockingManager::default();
        manager.on_header_block_sent(0, vec![0, 1], 2);
        manager.on_header_acknowledgement(0);

        // referencing already-acknowledged entries blocks nothing
        manager.on_header_block_sent(4, vec![1], 2);
        assert_eq!(manager.blocked_stream_count(), 0);
        // but the reference still pins the entry
        assert_eq!(manager.smallest_blocking_index(), 1);
    }

    #[test]
    fn test_insert_count_increment() {
        let mut manager = BlockingManager::default();
        manager.on_header_block_sent(0, vec![2], 3);
        manager.on_insert_count_increment(3, 5).unwrap();
        assert_eq!(manager.known_received_count(), 3);
        assert_eq!(manager.blocked_stream_count(), 0);

        // past the inserted entry count is a decoder-stream error
        assert!(manager.on_insert_count_increment(3, 5).is_err());
        // zero increments are meaningless
        assert!(manager.on_insert_count_increment(0, 5).is_err());
    }

    #[test]
    fn test_stray_acknowledgement() {
        let mut manager = BlockingManager::default();
        assert!(!manager.on_header_acknowledgement(0));
    }

    #[test]
    fn test_cancellation_releases_references() {
        let mut manager = BlockingManager::default();
        manager.on_header_block_sent(0, vec![0], 1);
        manager.on_header_block_sent(0, vec![1, 2], 3);
        manager.on_stream_cancellation(0);
        assert_eq!(manager.smallest_blocking_index(), u64::MAX);
        assert_eq!(manager.blocked_stream_count(), 0);
        // known received count does not advance on cancellation
        assert_eq!(manager.known_received_count(), 0);
    }

    #[test]
    fn test_shared_references_counted() {
        let mut manager = BlockingManager::default();
        manager.on_header_block_sent(0, vec![0], 1);
        manager.on_header_block_sent(4, vec![0], 1);
        manager.on_header_acknowledgement(0);
        // stream 4 still references entry 0
        assert_eq!(manager.smallest_blocking_index(), 0);
        manager.on_header_acknowledgement(4);
        assert_eq!(manager.smallest_blocking_index(), u64::MAX);
    }
}
