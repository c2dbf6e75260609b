//! Fixed-capacity insertion-ordered log.

use std::collections::VecDeque;

/// Keeps the most recent `capacity` items, evicting the oldest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundedLog<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Build from a stored list, keeping only the newest `capacity` entries.
    pub fn from_vec(items: Vec<T>, capacity: usize) -> Self {
        let mut log = Self::new(capacity);
        for item in items {
            log.push(item);
        }
        log
    }

    /// Append `item`, evicting the oldest entries past capacity.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
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

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: PartialEq> BoundedLog<T> {
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }
}

impl<T: Clone> BoundedLog<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_past_capacity() {
        let mut log = BoundedLog::new(3);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.to_vec(), vec![2, 3, 4]);
        assert!(!log.contains(&1));
        assert!(log.contains(&4));
    }

    #[test]
    fn test_from_vec_keeps_newest() {
        let log = BoundedLog::from_vec((0..150).collect(), 100);
        assert_eq!(log.len(), 100);
        assert_eq!(log.iter().next(), Some(&50));
    }
}
