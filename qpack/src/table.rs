use std::collections::VecDeque;

/// Per-entry overhead, per
/// [RFC 9204 Section 3.2.1](https://www.rfc-editor.org/rfc/rfc9204.html#section-3.2.1).
pub const ENTRY_OVERHEAD: u64 = 32;

/// The size one field occupies in the dynamic table.
pub fn entry_size(name: &str, value: &str) -> u64 {
    name.len() as u64 + value.len() as u64 + ENTRY_OVERHEAD
}

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    value: String,
    size: u64,
}

/// Errors of dynamic-table mutation; each maps to the fatal error of the
/// stream the offending instruction arrived on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("dynamic table capacity exceeds the negotiated maximum")]
    CapacityExceedsMaximum,
    #[error("entry does not fit the dynamic table capacity")]
    EntryTooLarge,
    #[error("insertion would evict an entry that must not be evicted yet")]
    WouldEvictProtectedEntry,
    #[error("dynamic table index out of range")]
    IndexOutOfRange,
}

/// The QPACK dynamic table: insertion-ordered entries addressed by
/// absolute index, evicted oldest-first under the capacity.
///
/// Both endpoints hold one: the encoder's table is written by the local
/// encoder stream, the decoder's by the peer's.
#[derive(Debug, Default)]
pub struct DynamicTable {
    entries: VecDeque<Entry>,
    /// Entries evicted so far; the absolute index of the oldest live
    /// entry, and the base of the deque.
    dropped_count: u64,
    size: u64,
    capacity: u64,
    /// Upper bound on capacity, fixed by the peer's settings.
    maximum_capacity: u64,
}

impl DynamicTable {
    pub fn new(maximum_capacity: u64) -> Self {
        Self {
            maximum_capacity,
            ..Default::default()
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Total entries ever inserted; the next insertion's absolute index.
    pub fn inserted_entry_count(&self) -> u64 {
        self.dropped_count + self.entries.len() as u64
    }

    /// The largest number of entries the table could ever hold, used by
    /// the required-insert-count wire encoding.
    pub fn max_entries(&self) -> u64 {
        self.maximum_capacity / ENTRY_OVERHEAD
    }

    pub fn get(&self, absolute_index: u64) -> Result<(&str, &str), TableError> {
        if absolute_index < self.dropped_count {
            return Err(TableError::IndexOutOfRange);
        }
        self.entries
            .get((absolute_index - self.dropped_count) as usize)
            .map(|entry| (entry.name.as_str(), entry.value.as_str()))
            .ok_or(TableError::IndexOutOfRange)
    }

    /// Change the capacity, evicting as needed. The new capacity must not
    /// exceed the maximum from the settings.
    pub fn set_capacity(&mut self, capacity: u64) -> Result<(), TableError> {
        if capacity > self.maximum_capacity {
            return Err(TableError::CapacityExceedsMaximum);
        }
        self.capacity = capacity;
        while self.size > self.capacity {
            let evicted = self
                .entries
                .pop_front()
                .expect("size is positive, entries cannot be empty");
            self.size -= evicted.size;
            self.dropped_count += 1;
        }
        Ok(())
    }

    /// Insert a field, evicting old entries down to `evict_frontier`:
    /// entries at or above that absolute index are still referenced and
    /// must survive. A decoder-side table passes `u64::MAX`.
    pub fn insert(
        &mut self,
        name: &str,
        value: &str,
        evict_frontier: u64,
    ) -> Result<u64, TableError> {
        let size = entry_size(name, value);
        if size > self.capacity {
            return Err(TableError::EntryTooLarge);
        }
        while self.size + size > self.capacity {
            if self.dropped_count >= evict_frontier {
                return Err(TableError::WouldEvictProtectedEntry);
            }
            let evicted = self
                .entries
                .pop_front()
                .expect("size exceeds capacity, entries cannot be empty");
            self.size -= evicted.size;
            self.dropped_count += 1;
        }
        self.entries.push_back(Entry {
            name: name.to_string(),
            value: value.to_string(),
            size,
        });
        self.size += size;
        Ok(self.inserted_entry_count() - 1)
    }

    /// Whether inserting an entry of this size could succeed while the
    /// entries at or above `evict_frontier` stay.
    pub fn can_insert(&self, name: &str, value: &str, evict_frontier: u64) -> bool {
        let size = entry_size(name, value);
        if size > self.capacity {
            return false;
        }
        let mut reclaimable = 0;
        for (i, entry) in self.entries.iter().enumerate() {
            if self.size + size - reclaimable <= self.capacity {
                break;
            }
            if self.dropped_count + i as u64 >= evict_frontier {
                break;
            }
            reclaimable += entry.size;
        }
        self.size + size - reclaimable <= self.capacity
    }

    /// The boundary below which entries are too old to reference: those
    /// that inserting a quarter of the capacity would evict.
    pub fn draining_index(&self) -> u64 {
        let required_space = self.capacity / 4;
        let mut reclaimable = self.capacity - self.size;
        for (i, entry) in self.entries.iter().enumerate() {
            if reclaimable >= required_space {
                return self.dropped_count + i as u64;
            }
            reclaimable += entry.size;
        }
        self.inserted_entry_count()
    }

    /// Find an exact or name-only match, preferring the newest entry.
    pub fn find(&self, name: &str, value: &str) -> (Option<u64>, Option<u64>) {
        let mut name_match = None;
        let mut full_match = None;
        for (i, entry) in self.entries.iter().enumerate().rev() {
            if entry.name == name {
                let absolute = self.dropped_count + i as u64;
                name_match.get_or_insert(absolute);
                if entry.value == value {
                    full_match = Some(absolute);
                    break;
                }
            }
        }
        (full_match, name_match)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(capacity: u64) -> DynamicTable {
        let mut table = DynamicTable::new(capacity);
        table.set_capacity(capacity).unwrap();
        table
    }

    #[test]
    fn test_insert_and_absolute_indices() {
        let mut table = table(4096);
        assert_eq!(table.insert("a", "1", u64::MAX).unwrap(), 0);
        assert_eq!(table.insert("b", "2", u64::MAX).unwrap(), 1);
        assert_eq!(table.inserted_entry_count(), 2);
        assert_eq!(table.get(0).unwrap(), ("a", "1"));
        assert_eq!(table.get(1).unwrap(), ("b", "2"));
        assert_eq!(table.get(2), Err(TableError::IndexOutOfRange));
    }

    #[test]
    fn test_eviction_keeps_absolute_indices() {
        // room for exactly two minimal entries
        let mut table = table(2 * entry_size("a", "1"));
        table.insert("a", "1", u64::MAX).unwrap();
        table.insert("b", "2", u64::MAX).unwrap();
        assert_eq!(table.insert("c", "3", u64::MAX).unwrap(), 2);
        assert_eq!(table.get(0), Err(TableError::IndexOutOfRange));
        assert_eq!(table.get(2).unwrap(), ("c", "3"));
    }

    #[test]
    fn test_protected_entries_block_insertion() {
        let mut table = table(2 * entry_size("a", "1"));
        table.insert("a", "1", u64::MAX).unwrap();
        table.insert("b", "2", u64::MAX).unwrap();
        // entry 0 is still referenced: nothing may be evicted
        assert!(!table.can_insert("c", "3", 0));
        assert_eq!(
            table.insert("c", "3", 0),
            Err(TableError::WouldEvictProtectedEntry)
        );
        // once the frontier moves past entry 0 the insert works
        assert!(table.can_insert("c", "3", 1));
        table.insert("c", "3", 1).unwrap();
    }

    #[test]
    fn test_capacity_bounds() {
        let mut table = DynamicTable::new(1024);
        assert_eq!(
            table.set_capacity(2048),
            Err(TableError::CapacityExceedsMaximum)
        );
        table.set_capacity(0).unwrap();
        assert_eq!(
            table.insert("a", "1", u64::MAX),
            Err(TableError::EntryTooLarge)
        );
    }

    #[test]
    fn test_draining_index() {
        let size = entry_size("a", "1");
        let mut table = table(4 * size);
        for _ in 0..4 {
            table.insert("a", "1", u64::MAX).unwrap();
        }
        // the full oldest quarter is draining
        assert_eq!(table.draining_index(), 1);
    }

    #[test]
    fn test_find_prefers_newest() {
        let mut table = table(4096);
        table.insert("a", "1", u64::MAX).unwrap();
        table.insert("a", "1", u64::MAX).unwrap();
        table.insert("a", "2", u64::MAX).unwrap();
        let (full, name) = table.find("a", "1");
        assert_eq!(full, Some(1));
        assert_eq!(name, Some(2));
    }
}
