//! Per-category ping queues
//!
//! Each category has its own mutex. The tracker holds a category's lock for
//! the whole of enqueue + flush, so pings of one category are always flushed
//! in one batch and in submission order, while the other category keeps
//! accepting pings.

use crate::model::{Category, Ping};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of queued pings that triggers a flush
pub const DEFAULT_FLUSH_THRESHOLD: usize = 5;

pub struct PingBuffer {
    queues: [Mutex<Vec<Ping>>; Category::ALL.len()],
    threshold: usize,
}

impl PingBuffer {
    /// `threshold` below 1 is raised to 1 (flush on every ping)
    pub fn new(threshold: usize) -> Self {
        Self {
            queues: std::array::from_fn(|_| Mutex::new(Vec::new())),
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Lock the queue for `category`
    ///
    /// A poisoned lock is recovered: the queue holds plain data and a panic
    /// elsewhere cannot leave it half-updated.
    pub fn lock(&self, category: Category) -> MutexGuard<'_, Vec<Ping>> {
        self.queues[category.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending(&self, category: Category) -> usize {
        self.lock(category).len()
    }

    pub fn is_full(&self, queue: &[Ping]) -> bool {
        queue.len() >= self.threshold
    }
}

impl Default for PingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_floor_is_one() {
        assert_eq!(PingBuffer::new(0).threshold(), 1);
        assert_eq!(PingBuffer::default().threshold(), DEFAULT_FLUSH_THRESHOLD);
    }

    #[test]
    fn test_queues_are_per_category() {
        let buffer = PingBuffer::new(3);
        buffer.lock(Category::Desktop).push(Ping::new(Category::Desktop, "A", 1));
        buffer.lock(Category::Desktop).push(Ping::new(Category::Desktop, "A", 2));

        assert_eq!(buffer.pending(Category::Desktop), 2);
        assert_eq!(buffer.pending(Category::Browser), 0);
    }

    #[test]
    fn test_is_full_at_threshold() {
        let buffer = PingBuffer::new(2);
        let mut queue = buffer.lock(Category::Browser);
        queue.push(Ping::new(Category::Browser, "a.com", 1));
        assert!(!buffer.is_full(&queue));
        queue.push(Ping::new(Category::Browser, "a.com", 2));
        assert!(buffer.is_full(&queue));
    }
}
