//! Fixed-capacity, drop-oldest ring buffer.
//!
//! # Invariants
//! - `len <= capacity` and `head < capacity`.
//! - The logical element `i` (0 = oldest) lives at `(head + i) % capacity`.
//! - Slots are allocated once at construction and never resized.
//!
//! # Threading
//! Not synchronized. The owning thread serializes access.

use crate::error::{CoreError, CoreResult};

/// Circular buffer that overwrites its oldest entry once full
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` entries
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `capacity` is zero
    pub fn new(capacity: usize) -> CoreResult<Self> {
        if capacity == 0 {
            return Err(CoreError::invalid_argument("capacity", "must be > 0"));
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            head: 0,
            len: 0,
        })
    }

    /// Maximum number of retained entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of retained entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True once appends start overwriting
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Append a value, overwriting the oldest when full. O(1), no allocation.
    pub fn append(&mut self, value: T) {
        let cap = self.capacity();
        if self.len < cap {
            let tail = (self.head + self.len) % cap;
            self.slots[tail] = Some(value);
            self.len += 1;
        } else {
            self.slots[self.head] = Some(value);
            self.head = (self.head + 1) % cap;
        }
        debug_assert!(self.len <= cap);
    }

    /// Logical element `index`, 0 being the oldest
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        self.slots[(self.head + index) % self.capacity()].as_ref()
    }

    /// Most recently appended element
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    /// Drop every entry, keeping the allocation
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Materialize entries oldest first
    ///
    /// With `limit`, only the most recent `limit` entries are returned, still
    /// oldest first within that tail.
    #[must_use]
    pub fn snapshot(&self, limit: Option<usize>) -> Vec<T> {
        let take = limit.map_or(self.len, |l| l.min(self.len));
        let skip = self.len - take;
        self.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_capacity_rejected() {
        let err = RingBuffer::<u8>::new(0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn test_drop_oldest() {
        let mut ring = RingBuffer::new(3).unwrap();
        for v in 1..=4 {
            ring.append(v);
        }
        assert_eq!(ring.snapshot(None), vec![2, 3, 4]);
        assert!(ring.is_full());
        assert_eq!(ring.latest(), Some(&4));
    }

    #[test]
    fn test_snapshot_limit() {
        let mut ring = RingBuffer::new(5).unwrap();
        for v in 0..4 {
            ring.append(v);
        }
        assert_eq!(ring.snapshot(Some(2)), vec![2, 3]);
        assert_eq!(ring.snapshot(Some(10)), vec![0, 1, 2, 3]);
        assert!(ring.snapshot(Some(0)).is_empty());
    }

    #[test]
    fn test_partial_fill() {
        let mut ring = RingBuffer::new(4).unwrap();
        assert!(ring.is_empty());
        assert_eq!(ring.latest(), None);
        ring.append("a");
        ring.append("b");
        assert_eq!(ring.len(), 2);
        assert!(!ring.is_full());
        assert_eq!(ring.get(0), Some(&"a"));
        assert_eq!(ring.get(2), None);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut ring = RingBuffer::new(2).unwrap();
        ring.append(1);
        ring.append(2);
        ring.append(3);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 2);
        ring.append(9);
        assert_eq!(ring.snapshot(None), vec![9]);
    }

    #[test]
    fn test_iter_reverse() {
        let mut ring = RingBuffer::new(3).unwrap();
        for v in 0..5 {
            ring.append(v);
        }
        let newest_first: Vec<_> = ring.iter().rev().copied().collect();
        assert_eq!(newest_first, vec![4, 3, 2]);
    }

    proptest! {
        #[test]
        fn prop_snapshot_is_tail_of_appends(cap in 1usize..32, values in proptest::collection::vec(any::<u16>(), 0..128)) {
            let mut ring = RingBuffer::new(cap).unwrap();
            for v in &values {
                ring.append(*v);
            }
            let start = values.len().saturating_sub(cap);
            prop_assert_eq!(ring.snapshot(None), values[start..].to_vec());
        }

        #[test]
        fn prop_limit_is_tail_of_full_snapshot(cap in 1usize..32, n in 0usize..96, k in 0usize..40) {
            let mut ring = RingBuffer::new(cap).unwrap();
            for v in 0..n {
                ring.append(v);
            }
            let full = ring.snapshot(None);
            let tail = ring.snapshot(Some(k));
            let start = full.len().saturating_sub(k);
            prop_assert_eq!(tail, full[start..].to_vec());
        }
    }
}
