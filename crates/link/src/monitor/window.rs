//! Bounded, timestamped event window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// FIFO of timestamped entries that silently evicts the oldest entry once
/// `capacity` is reached.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    entries: VecDeque<(Instant, T)>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity.min(1024)), capacity }
    }

    pub fn push(&mut self, at: Instant, value: T) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((at, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries stamped within `window` of `now`, oldest first.
    pub fn within(&self, now: Instant, window: Duration) -> impl Iterator<Item = &T> + '_ {
        let cutoff = now.checked_sub(window);
        self.entries
            .iter()
            .filter(move |(at, _)| cutoff.map_or(true, |cutoff| *at >= cutoff))
            .map(|(_, value)| value)
    }

    pub fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.within(now, window).count()
    }

    /// The `n` most recent entries, newest last.
    pub fn latest(&self, n: usize) -> impl Iterator<Item = &T> + '_ {
        self.entries.iter().skip(self.entries.len().saturating_sub(n)).map(|(_, value)| value)
    }
}
