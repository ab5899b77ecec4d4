// ABOUTME: Fixed-capacity recency set of global websocket event ids.
// ABOUTME: Global events reach every room connection; this drops the redeliveries.

use std::collections::{HashSet, VecDeque};

/// Default number of recent global event ids remembered
pub const DEFAULT_DEDUP_CAPACITY: usize = 20;

/// Insertion-ordered window of the last `capacity` event ids
#[derive(Debug, Clone)]
pub struct EventDedupBuffer {
    order: VecDeque<u64>,
    seen: HashSet<u64>,
    capacity: usize,
}

impl Default for EventDedupBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

impl EventDedupBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            seen: HashSet::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.seen.contains(&id)
    }

    /// Record an id, evicting the oldest one once over capacity.
    /// Pushing an id already in the window leaves the window unchanged.
    pub fn push(&mut self, id: u64) {
        if !self.seen.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    /// Record `id` and report whether it was new
    pub fn check_and_mark(&mut self, id: u64) -> bool {
        if self.contains(id) {
            return false;
        }
        self.push(id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
