//! Per-client timestamp log.

use std::collections::VecDeque;

/// The admitted-request timestamps of one client, oldest first.
///
/// Timestamps are milliseconds since the Unix epoch. The log stays sorted even
/// when requests are recorded out of order, so pruning only ever trims a
/// prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    timestamps: VecDeque<i64>,
}

impl Bucket {
    /// Create an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every timestamp at or before `now - window_ms`.
    ///
    /// Returns the number of timestamps removed.
    pub fn prune(&mut self, now: i64, window_ms: i64) -> usize {
        let cutoff = now.saturating_sub(window_ms);
        let before = self.timestamps.len();
        while self.timestamps.front().is_some_and(|&ts| ts <= cutoff) {
            self.timestamps.pop_front();
        }
        before - self.timestamps.len()
    }

    /// Record an admitted request, keeping the log sorted.
    ///
    /// Callers read the clock before taking the bucket lock, so a request can
    /// arrive here behind a later one. Appending is the common case.
    pub fn record(&mut self, now: i64) {
        match self.timestamps.back() {
            Some(&last) if last > now => {
                let at = self.timestamps.partition_point(|&ts| ts <= now);
                self.timestamps.insert(at, now);
            }
            _ => self.timestamps.push_back(now),
        }
    }

    /// The oldest timestamp still held.
    pub fn oldest(&self) -> Option<i64> {
        self.timestamps.front().copied()
    }

    /// Number of timestamps held.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the bucket holds no timestamps.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
