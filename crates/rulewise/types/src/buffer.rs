//! Bounded FIFO buffer shared by the knowledge base and the engine.

use std::collections::VecDeque;

/// A bounded buffer that evicts its oldest entry when full.
///
/// Unlike a plain ring, `push` hands the evicted entry back so callers can
/// account for what fell out of the window.
#[derive(Clone, Debug)]
pub struct BoundedBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T> BoundedBuffer<T> {
    /// Create a buffer holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            evicted: 0,
        }
    }

    /// Append an entry, returning the evicted oldest entry if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.evicted += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip)
    }

    /// Remove and return every entry, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries evicted since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Fill level as a fraction (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        self.items.len() as f64 / self.capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let mut buf = BoundedBuffer::new(3);
        assert_eq!(buf.push(1), None);
        assert_eq!(buf.push(2), None);
        assert_eq!(buf.push(3), None);
        assert_eq!(buf.push(4), Some(1));
        assert_eq!(buf.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(buf.evicted(), 1);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn zero_capacity_is_bumped() {
        let mut buf = BoundedBuffer::new(0);
        assert_eq!(buf.capacity(), 1);
        buf.push("a");
        assert_eq!(buf.push("b"), Some("a"));
    }

    #[test]
    fn recent_and_drain() {
        let mut buf = BoundedBuffer::new(10);
        for i in 0..6 {
            buf.push(i);
        }
        assert_eq!(buf.recent(2).copied().collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(buf.recent(100).count(), 6);
        assert!((buf.utilization() - 0.6).abs() < 1e-12);
        assert_eq!(buf.drain(), vec![0, 1, 2, 3, 4, 5]);
        assert!(buf.is_empty());
    }
}
