//! Bounded, in-memory history of terminated runs.

use merge_common::RunSnapshot;
use std::collections::VecDeque;

/// Default number of runs retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Default number of entries returned by a history query.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Fixed-capacity ring of run snapshots, most recent first.
#[derive(Debug, Clone)]
pub struct RunHistory {
    capacity: usize,
    entries: VecDeque<RunSnapshot>,
}

impl RunHistory {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Record a terminated run, evicting the oldest entry when full.
    pub fn record(&mut self, snapshot: RunSnapshot) {
        self.entries.push_front(snapshot);
        self.entries.truncate(self.capacity);
    }

    /// Up to `limit` entries, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<RunSnapshot> {
        self.entries.iter().take(limit).cloned().collect()
    }

    pub fn get(&self, run_id: &str) -> Option<&RunSnapshot> {
        self.entries.iter().find(|r| r.id == run_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RunHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
